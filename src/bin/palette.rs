use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use kmeans_color_wasm::{Centroid, ColorSpace, PaletteOptions, SortOrder, palette_from_image_bytes};

/// Terminal columns a 100% swatch would span.
const BAR_WIDTH: usize = 60;

/// Extract a color palette from an image (native wrapper around the wasm library).
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Input image path
    input: PathBuf,

    /// Number of colors to extract
    #[arg(short = 'k', long, default_value_t = 5)]
    k: usize,

    /// Iteration cap for the k-means loop
    #[arg(short = 'm', long, default_value_t = 20)]
    max_iter: usize,

    /// Convergence threshold; defaults to a value suited to the color space
    #[arg(short = 'c', long)]
    converge: Option<f32>,

    /// Color space to cluster in: RGB or LAB
    #[arg(long, default_value = "RGB")]
    color_space: String,

    /// Output order: percentage or luminosity
    #[arg(short = 's', long, default_value = "percentage")]
    sort: String,

    /// Seed for centroid initialization
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Downscale so the longest side equals this before clustering (0 disables)
    #[arg(short = 'r', long, default_value_t = 128)]
    resize: u32,

    /// Emit the palette as JSON instead of a swatch bar
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let options = PaletteOptions {
        k: args.k,
        max_iter: args.max_iter,
        converge: args.converge,
        color_space: args.color_space.parse::<ColorSpace>()?,
        sort: args.sort.parse::<SortOrder>()?,
        seed: args.seed,
    };
    let resize = (args.resize > 0).then_some(args.resize);

    let bytes = fs::read(&args.input)
        .with_context(|| format!("unable to read {}", args.input.display()))?;

    let start = Instant::now();
    let palette =
        palette_from_image_bytes(&bytes, &options, resize).context("palette extraction failed")?;
    let elapsed = start.elapsed();

    if args.json {
        print_json(&palette, elapsed)?;
    } else {
        print_swatches(&palette);
        println!("k-means took {:.1} ms", elapsed.as_secs_f64() * 1000.0);
    }

    Ok(())
}

fn print_swatches(palette: &[Centroid]) {
    for centroid in palette {
        let [r, g, b] = centroid.rgb;
        let [l, a, lab_b] = centroid.lab;
        let width = ((centroid.percentage * BAR_WIDTH as f32).round() as usize).max(1);
        println!(
            "\x1b[38;2;{r};{g};{b}m{bar}\x1b[0m {hex}  rgb({r}, {g}, {b})  lab({l:.1}, {a:.1}, {lab_b:.1})  {pct:.1}%",
            bar = "█".repeat(width),
            hex = centroid.rgb_hex(),
            pct = centroid.percentage * 100.0,
        );
    }
}

fn print_json(palette: &[Centroid], elapsed: Duration) -> Result<()> {
    let entries: Vec<serde_json::Value> = palette
        .iter()
        .map(|centroid| {
            serde_json::json!({
                "rgb": centroid.rgb,
                "rgb_hex": centroid.rgb_hex(),
                "lab": centroid.lab,
                "percentage": centroid.percentage,
            })
        })
        .collect();
    let out = serde_json::json!({
        "elapsed_ms": elapsed.as_secs_f64() * 1000.0,
        "palette": entries,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}
