pub fn set_panic_hook() {
    // Route panic messages to the browser console instead of losing them to
    // an opaque `unreachable` trap.
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}
