//! Extract a color palette from an image with k-means clustering, exposed to
//! JavaScript through wasm-bindgen. The heavy lifting happens in [`cluster`];
//! this module only crosses the JS boundary: option-object parsing, canvas
//! pixel sampling, and the `Centroid` class handed back to callers.

mod cluster;
mod utils;

pub use cluster::{
    Centroid, ColorSpace, MAX_ITERATIONS, PaletteError, PaletteOptions, SortOrder,
    palette_from_image_bytes, palette_from_rgba,
};

use js_sys::Reflect;
use wasm_bindgen::prelude::*;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement, ImageData};

/// Side length the source image is sampled down to before clustering. Keeps
/// the pixel count bounded no matter how large the source is.
const SAMPLE_SIZE: u32 = 100;

/// Cluster the pixels of an image into `k` representative colors.
///
/// `image` may be an `HTMLImageElement`, an `HTMLCanvasElement`, or an
/// `ImageData`. `options` is a plain object; missing fields take defaults:
/// `{ k, max_iter, converge, color_space, sort, seed }`.
#[wasm_bindgen]
pub fn get_kmeans(image: JsValue, options: JsValue) -> Result<Vec<JsCentroid>, JsValue> {
    utils::set_panic_hook();
    let options = parse_options(&options)?;
    let rgba = image_to_rgba(&image)?;
    let palette = cluster::palette_from_rgba(&rgba, &options).map_err(to_js_error)?;
    Ok(palette.into_iter().map(JsCentroid::from).collect())
}

/// Like [`get_kmeans`], but for encoded image bytes (a dropped or uploaded
/// file read into an ArrayBuffer) instead of a live DOM handle.
#[wasm_bindgen]
pub fn get_kmeans_from_bytes(input: Vec<u8>, options: JsValue) -> Result<Vec<JsCentroid>, JsValue> {
    utils::set_panic_hook();
    let options = parse_options(&options)?;
    let palette = cluster::palette_from_image_bytes(&input, &options, Some(SAMPLE_SIZE))
        .map_err(to_js_error)?;
    Ok(palette.into_iter().map(JsCentroid::from).collect())
}

#[wasm_bindgen]
pub fn rgb_to_hex(r: u8, g: u8, b: u8) -> String {
    cluster::rgb_to_hex(r, g, b)
}

/// One palette entry as seen from JavaScript.
#[wasm_bindgen(js_name = Centroid)]
pub struct JsCentroid {
    inner: cluster::Centroid,
}

#[wasm_bindgen(js_class = Centroid)]
impl JsCentroid {
    /// `[r, g, b]`, each in 0..=255.
    #[wasm_bindgen(getter)]
    pub fn rgb(&self) -> Vec<u8> {
        self.inner.rgb.to_vec()
    }

    /// Lowercase `#rrggbb`.
    #[wasm_bindgen(getter)]
    pub fn rgb_hex(&self) -> String {
        self.inner.rgb_hex()
    }

    /// `[L, a, b]`.
    #[wasm_bindgen(getter)]
    pub fn lab(&self) -> Vec<f32> {
        self.inner.lab.to_vec()
    }

    /// Fraction of clustered pixels in this cluster, in `[0, 1]`.
    #[wasm_bindgen(getter)]
    pub fn percentage(&self) -> f32 {
        self.inner.percentage
    }
}

impl From<cluster::Centroid> for JsCentroid {
    fn from(inner: cluster::Centroid) -> Self {
        Self { inner }
    }
}

fn parse_options(options: &JsValue) -> Result<PaletteOptions, JsValue> {
    let mut parsed = PaletteOptions::default();
    if options.is_undefined() || options.is_null() {
        return Ok(parsed);
    }
    if !options.is_object() {
        return Err(JsValue::from_str("options must be an object"));
    }

    if let Some(k) = get_integer(options, "k")? {
        parsed.k = k as usize;
    }
    if let Some(max_iter) = get_integer(options, "max_iter")? {
        parsed.max_iter = max_iter as usize;
    }
    if let Some(converge) = get_number(options, "converge")? {
        parsed.converge = Some(converge as f32);
    }
    if let Some(seed) = get_integer(options, "seed")? {
        parsed.seed = seed;
    }
    if let Some(space) = get_string(options, "color_space")? {
        parsed.color_space = space.parse().map_err(to_js_error)?;
    }
    if let Some(sort) = get_string(options, "sort")? {
        parsed.sort = sort.parse().map_err(to_js_error)?;
    }
    Ok(parsed)
}

fn get_number(options: &JsValue, key: &str) -> Result<Option<f64>, JsValue> {
    let value = Reflect::get(options, &JsValue::from_str(key))?;
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    value
        .as_f64()
        .map(Some)
        .ok_or_else(|| JsValue::from_str(&format!("{key} must be a number")))
}

// Counts and seeds come across the boundary as f64; a bare `as` cast would
// silently truncate 2.7 to 2 and saturate -3 to 0, so reject those outright.
fn get_integer(options: &JsValue, key: &str) -> Result<Option<u64>, JsValue> {
    let Some(value) = get_number(options, key)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 || value < 0.0 {
        return Err(JsValue::from_str(&format!(
            "{key} must be a non-negative integer, got {value}"
        )));
    }
    Ok(Some(value as u64))
}

fn get_string(options: &JsValue, key: &str) -> Result<Option<String>, JsValue> {
    let value = Reflect::get(options, &JsValue::from_str(key))?;
    if value.is_undefined() || value.is_null() {
        return Ok(None);
    }
    value
        .as_string()
        .map(Some)
        .ok_or_else(|| JsValue::from_str(&format!("{key} must be a string")))
}

fn to_js_error(err: PaletteError) -> JsValue {
    JsValue::from_str(&err.to_string())
}

/// Rasterize a DOM image handle to RGBA bytes by drawing it onto an
/// offscreen canvas at [`SAMPLE_SIZE`]².
fn image_to_rgba(image: &JsValue) -> Result<Vec<u8>, JsValue> {
    let document = web_sys::window()
        .ok_or_else(|| JsValue::from_str("no window available"))?
        .document()
        .ok_or_else(|| JsValue::from_str("no document available"))?;
    let canvas = document
        .create_element("canvas")?
        .dyn_into::<HtmlCanvasElement>()?;
    canvas.set_width(SAMPLE_SIZE);
    canvas.set_height(SAMPLE_SIZE);
    let context = canvas
        .get_context("2d")?
        .ok_or_else(|| JsValue::from_str("2d canvas context unavailable"))?
        .dyn_into::<CanvasRenderingContext2d>()?;
    let side = f64::from(SAMPLE_SIZE);

    if let Ok(image) = image.clone().dyn_into::<HtmlImageElement>() {
        context.draw_image_with_html_image_element_and_dw_and_dh(&image, 0.0, 0.0, side, side)?;
    } else if let Ok(image) = image.clone().dyn_into::<HtmlCanvasElement>() {
        context.draw_image_with_html_canvas_element_and_dw_and_dh(&image, 0.0, 0.0, side, side)?;
    } else if let Ok(image) = image.clone().dyn_into::<ImageData>() {
        // ImageData cannot be drawn scaled directly; put it at full size,
        // then redraw the canvas onto itself at the sample size.
        canvas.set_width(image.width());
        canvas.set_height(image.height());
        context.put_image_data(&image, 0.0, 0.0)?;
        context.draw_image_with_html_canvas_element_and_dw_and_dh(&canvas, 0.0, 0.0, side, side)?;
    } else {
        return Err(JsValue::from_str(
            "image should be an img element, a canvas element, or an ImageData",
        ));
    }

    Ok(context
        .get_image_data(0.0, 0.0, side, side)?
        .data()
        .to_vec())
}
