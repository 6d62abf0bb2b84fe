//! Core palette extraction: turn RGBA pixel data into a small set of
//! representative colors via k-means, independent of any JS plumbing.

use std::str::FromStr;

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView};
use kmeans_colors::{CentroidData, Sort};
use palette::cast::from_component_slice;
use palette::{FromColor, IntoColor, Lab, Srgb, Srgba, WithAlpha};
use thiserror::Error;

/// Hard cap on the iteration count, so a wild form value cannot hang the
/// event thread the clustering call runs on.
pub const MAX_ITERATIONS: usize = 500;

const DEFAULT_K: usize = 5;
const DEFAULT_MAX_ITER: usize = 20;

// Convergence defaults differ by working space; Lab distances are on a much
// larger scale than normalized RGB.
const RGB_CONVERGE: f32 = 0.0025;
const LAB_CONVERGE: f32 = 10.0;

#[derive(Debug, Error)]
pub enum PaletteError {
    #[error("k must be at least 1, got {0}")]
    InvalidClusterCount(usize),

    #[error("RGBA buffer length {0} is not a multiple of 4")]
    BufferLength(usize),

    #[error("image contains no opaque pixels")]
    NoOpaquePixels,

    #[error("unable to decode image: {0}")]
    Decode(#[from] image::ImageError),

    #[error("unknown color space {0:?}, expected \"RGB\" or \"LAB\"")]
    UnknownColorSpace(String),

    #[error("unknown sort order {0:?}, expected \"percentage\" or \"luminosity\"")]
    UnknownSortOrder(String),
}

/// Color space the clustering runs in. Centroids are reported in both RGB and
/// Lab regardless of which space produced them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorSpace {
    #[default]
    Rgb,
    Lab,
}

impl FromStr for ColorSpace {
    type Err = PaletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RGB" => Ok(Self::Rgb),
            "LAB" => Ok(Self::Lab),
            _ => Err(PaletteError::UnknownColorSpace(s.to_owned())),
        }
    }
}

/// Display order of the resulting palette.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Largest population share first.
    #[default]
    Percentage,
    /// Dark to light, by Lab lightness.
    Luminosity,
}

impl FromStr for SortOrder {
    type Err = PaletteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "percentage" => Ok(Self::Percentage),
            "luminosity" => Ok(Self::Luminosity),
            _ => Err(PaletteError::UnknownSortOrder(s.to_owned())),
        }
    }
}

/// Tunable knobs for a clustering call, mirroring the demo form controls.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaletteOptions {
    /// Number of clusters. Must be at least 1.
    pub k: usize,
    /// Iteration cap, clamped to [`MAX_ITERATIONS`].
    pub max_iter: usize,
    /// Convergence threshold. `None` picks a default suited to `color_space`.
    pub converge: Option<f32>,
    pub color_space: ColorSpace,
    pub sort: SortOrder,
    /// Seed for centroid initialization. Fixed seed gives repeatable palettes.
    pub seed: u64,
}

impl Default for PaletteOptions {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            max_iter: DEFAULT_MAX_ITER,
            converge: None,
            color_space: ColorSpace::default(),
            sort: SortOrder::default(),
            seed: 0,
        }
    }
}

impl PaletteOptions {
    /// The threshold actually passed to the k-means call.
    pub fn converge_threshold(&self) -> f32 {
        self.converge.unwrap_or(match self.color_space {
            ColorSpace::Rgb => RGB_CONVERGE,
            ColorSpace::Lab => LAB_CONVERGE,
        })
    }

    fn iteration_cap(&self) -> usize {
        self.max_iter.min(MAX_ITERATIONS)
    }

    fn validate(&self) -> Result<(), PaletteError> {
        if self.k == 0 {
            return Err(PaletteError::InvalidClusterCount(self.k));
        }
        Ok(())
    }
}

/// One palette entry: a representative color and its population share.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub rgb: [u8; 3],
    pub lab: [f32; 3],
    /// Fraction of clustered pixels assigned to this centroid, in `[0, 1]`.
    pub percentage: f32,
}

impl Centroid {
    /// Lowercase `#rrggbb` form of the RGB value.
    pub fn rgb_hex(&self) -> String {
        let [r, g, b] = self.rgb;
        rgb_to_hex(r, g, b)
    }

    fn from_srgb(data: CentroidData<Srgb>) -> Self {
        let lab: Lab = data.centroid.into_color();
        let (r, g, b) = data.centroid.into_format::<u8>().into_components();
        Self {
            rgb: [r, g, b],
            lab: [lab.l, lab.a, lab.b],
            percentage: data.percentage,
        }
    }

    fn from_lab(data: CentroidData<Lab>) -> Self {
        let rgb = Srgb::from_color(data.centroid).into_format::<u8>();
        Self {
            rgb: [rgb.red, rgb.green, rgb.blue],
            lab: [data.centroid.l, data.centroid.a, data.centroid.b],
            percentage: data.percentage,
        }
    }
}

pub fn rgb_to_hex(r: u8, g: u8, b: u8) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Cluster an RGBA byte buffer into `options.k` representative colors.
///
/// Fully transparent pixels are excluded before clustering; a buffer with no
/// opaque pixels is an error. The returned list is ordered per `options.sort`
/// and replaces any previous result wholesale.
pub fn palette_from_rgba(
    rgba: &[u8],
    options: &PaletteOptions,
) -> Result<Vec<Centroid>, PaletteError> {
    options.validate()?;
    if rgba.len() % 4 != 0 {
        return Err(PaletteError::BufferLength(rgba.len()));
    }

    let mut centroids = match options.color_space {
        ColorSpace::Rgb => {
            let pixels: Vec<Srgb> = from_component_slice::<Srgba<u8>>(rgba)
                .iter()
                .filter(|px| px.alpha > 0)
                .map(|px| px.without_alpha().into_format())
                .collect();
            if pixels.is_empty() {
                return Err(PaletteError::NoOpaquePixels);
            }
            let result = kmeans_colors::get_kmeans(
                options.k,
                options.iteration_cap(),
                options.converge_threshold(),
                false,
                &pixels,
                options.seed,
            );
            Srgb::sort_indexed_colors(&result.centroids, &result.indices)
                .into_iter()
                .map(Centroid::from_srgb)
                .collect::<Vec<_>>()
        }
        ColorSpace::Lab => {
            let pixels: Vec<Lab> = from_component_slice::<Srgba<u8>>(rgba)
                .iter()
                .filter(|px| px.alpha > 0)
                .map(|px| px.without_alpha().into_format::<f32>().into_color())
                .collect();
            if pixels.is_empty() {
                return Err(PaletteError::NoOpaquePixels);
            }
            let result = kmeans_colors::get_kmeans(
                options.k,
                options.iteration_cap(),
                options.converge_threshold(),
                false,
                &pixels,
                options.seed,
            );
            Lab::sort_indexed_colors(&result.centroids, &result.indices)
                .into_iter()
                .map(Centroid::from_lab)
                .collect::<Vec<_>>()
        }
    };

    sort_centroids(&mut centroids, options.sort);
    Ok(centroids)
}

/// Decode encoded image bytes and cluster them. `resize` optionally
/// downscales so the longest side equals the given value (nearest-neighbour)
/// before clustering, trading accuracy for speed on large images.
pub fn palette_from_image_bytes(
    input: &[u8],
    options: &PaletteOptions,
    resize: Option<u32>,
) -> Result<Vec<Centroid>, PaletteError> {
    let img = image::load_from_memory(input)?;
    let img = match resize {
        Some(side) if side > 0 => downscale_longest_side(&img, side),
        _ => img,
    };
    palette_from_rgba(&img.to_rgba8().into_raw(), options)
}

pub(crate) fn sort_centroids(centroids: &mut [Centroid], order: SortOrder) {
    match order {
        SortOrder::Percentage => {
            centroids.sort_unstable_by(|a, b| b.percentage.total_cmp(&a.percentage));
        }
        SortOrder::Luminosity => {
            centroids.sort_unstable_by(|a, b| a.lab[0].total_cmp(&b.lab[0]));
        }
    }
}

fn downscale_longest_side(img: &DynamicImage, side: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let ratio = side as f32 / w.max(h) as f32;
    if ratio >= 1.0 {
        return img.clone();
    }
    let out_w = ((w as f32) * ratio).round().max(1.0) as u32;
    let out_h = ((h as f32) * ratio).round().max(1.0) as u32;
    DynamicImage::ImageRgba8(image::imageops::resize(img, out_w, out_h, FilterType::Nearest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn solid(rgba: [u8; 4], count: usize) -> Vec<u8> {
        rgba.iter().copied().cycle().take(count * 4).collect()
    }

    #[rstest]
    #[case(0x40, 0x80, 0xc0, "#4080c0")]
    #[case(0x00, 0x00, 0x00, "#000000")]
    #[case(0xff, 0xff, 0xff, "#ffffff")]
    #[case(0x7b, 0x2d, 0x43, "#7b2d43")]
    fn hex_formatting(#[case] r: u8, #[case] g: u8, #[case] b: u8, #[case] expected: &str) {
        assert_eq!(rgb_to_hex(r, g, b), expected);
    }

    #[test]
    fn centroid_hex_uses_rgb_value() {
        let centroid = Centroid {
            rgb: [255, 0, 128],
            lab: [0.0, 0.0, 0.0],
            percentage: 1.0,
        };
        assert_eq!(centroid.rgb_hex(), "#ff0080");
    }

    #[rstest]
    #[case("RGB", ColorSpace::Rgb)]
    #[case("rgb", ColorSpace::Rgb)]
    #[case("LAB", ColorSpace::Lab)]
    #[case("lab", ColorSpace::Lab)]
    fn color_space_parsing(#[case] input: &str, #[case] expected: ColorSpace) {
        assert_eq!(input.parse::<ColorSpace>().unwrap(), expected);
    }

    #[test]
    fn color_space_rejects_unknown() {
        assert!(matches!(
            "HSV".parse::<ColorSpace>(),
            Err(PaletteError::UnknownColorSpace(s)) if s == "HSV"
        ));
    }

    #[rstest]
    #[case("percentage", SortOrder::Percentage)]
    #[case("Percentage", SortOrder::Percentage)]
    #[case("luminosity", SortOrder::Luminosity)]
    #[case("LUMINOSITY", SortOrder::Luminosity)]
    fn sort_order_parsing(#[case] input: &str, #[case] expected: SortOrder) {
        assert_eq!(input.parse::<SortOrder>().unwrap(), expected);
    }

    #[test]
    fn sort_order_rejects_unknown() {
        assert!(matches!(
            "hue".parse::<SortOrder>(),
            Err(PaletteError::UnknownSortOrder(_))
        ));
    }

    #[test]
    fn default_options() {
        let options = PaletteOptions::default();
        assert_eq!(options.k, 5);
        assert_eq!(options.max_iter, 20);
        assert_eq!(options.converge, None);
        assert_eq!(options.color_space, ColorSpace::Rgb);
        assert_eq!(options.sort, SortOrder::Percentage);
        assert_eq!(options.seed, 0);
    }

    #[test]
    fn converge_default_tracks_color_space() {
        let rgb = PaletteOptions::default();
        assert_eq!(rgb.converge_threshold(), 0.0025);

        let lab = PaletteOptions {
            color_space: ColorSpace::Lab,
            ..PaletteOptions::default()
        };
        assert_eq!(lab.converge_threshold(), 10.0);

        let explicit = PaletteOptions {
            converge: Some(0.5),
            ..PaletteOptions::default()
        };
        assert_eq!(explicit.converge_threshold(), 0.5);
    }

    #[test]
    fn iteration_cap_is_clamped() {
        let options = PaletteOptions {
            max_iter: 10_000,
            ..PaletteOptions::default()
        };
        assert_eq!(options.iteration_cap(), MAX_ITERATIONS);
    }

    #[test]
    fn solid_color_yields_exact_centroid() {
        let buf = solid([10, 200, 60, 255], 64);
        let options = PaletteOptions {
            k: 1,
            ..PaletteOptions::default()
        };
        let palette = palette_from_rgba(&buf, &options).unwrap();
        assert_eq!(palette.len(), 1);
        assert_eq!(palette[0].rgb, [10, 200, 60]);
        assert!((palette[0].percentage - 1.0).abs() < 1e-6);
    }

    #[test]
    fn solid_color_in_lab_space_round_trips() {
        let buf = solid([10, 200, 60, 255], 64);
        let options = PaletteOptions {
            k: 1,
            color_space: ColorSpace::Lab,
            ..PaletteOptions::default()
        };
        let palette = palette_from_rgba(&buf, &options).unwrap();
        assert_eq!(palette.len(), 1);
        for (got, want) in palette[0].rgb.iter().zip([10u8, 200, 60]) {
            assert!(got.abs_diff(want) <= 2, "channel {got} too far from {want}");
        }
    }

    #[test]
    fn transparent_pixels_are_excluded() {
        let mut buf = solid([0, 255, 0, 0], 32);
        buf.extend(solid([255, 0, 0, 255], 32));
        let options = PaletteOptions {
            k: 1,
            ..PaletteOptions::default()
        };
        let palette = palette_from_rgba(&buf, &options).unwrap();
        assert_eq!(palette[0].rgb, [255, 0, 0]);
    }

    #[test]
    fn fully_transparent_buffer_is_an_error() {
        let buf = solid([1, 2, 3, 0], 16);
        let result = palette_from_rgba(&buf, &PaletteOptions::default());
        assert!(matches!(result, Err(PaletteError::NoOpaquePixels)));
    }

    #[test]
    fn zero_clusters_is_an_error() {
        let buf = solid([1, 2, 3, 255], 16);
        let options = PaletteOptions {
            k: 0,
            ..PaletteOptions::default()
        };
        let result = palette_from_rgba(&buf, &options);
        assert!(matches!(result, Err(PaletteError::InvalidClusterCount(0))));
    }

    #[test]
    fn ragged_buffer_is_an_error() {
        let result = palette_from_rgba(&[0, 1, 2, 3, 4], &PaletteOptions::default());
        assert!(matches!(result, Err(PaletteError::BufferLength(5))));
    }

    fn gradient_buffer() -> Vec<u8> {
        (0..256u32)
            .flat_map(|i| [i as u8, (255 - i) as u8, (i * 7 % 256) as u8, 255])
            .collect()
    }

    #[test]
    fn percentages_sum_to_one() {
        let buf = gradient_buffer();
        for color_space in [ColorSpace::Rgb, ColorSpace::Lab] {
            let options = PaletteOptions {
                k: 4,
                color_space,
                ..PaletteOptions::default()
            };
            let palette = palette_from_rgba(&buf, &options).unwrap();
            let total: f32 = palette.iter().map(|c| c.percentage).sum();
            assert!((total - 1.0).abs() < 1e-3, "sum was {total}");
        }
    }

    #[test]
    fn percentage_order_is_descending() {
        let buf = gradient_buffer();
        let options = PaletteOptions {
            k: 4,
            ..PaletteOptions::default()
        };
        let palette = palette_from_rgba(&buf, &options).unwrap();
        for pair in palette.windows(2) {
            assert!(pair[0].percentage >= pair[1].percentage);
        }
    }

    #[test]
    fn luminosity_order_is_dark_to_light() {
        let buf = gradient_buffer();
        let options = PaletteOptions {
            k: 4,
            sort: SortOrder::Luminosity,
            ..PaletteOptions::default()
        };
        let palette = palette_from_rgba(&buf, &options).unwrap();
        for pair in palette.windows(2) {
            assert!(pair[0].lab[0] <= pair[1].lab[0]);
        }
    }

    #[test]
    fn sort_centroids_orders_both_ways() {
        let make = |percentage: f32, l: f32| Centroid {
            rgb: [0, 0, 0],
            lab: [l, 0.0, 0.0],
            percentage,
        };
        let mut centroids = vec![make(0.2, 80.0), make(0.5, 10.0), make(0.3, 40.0)];

        sort_centroids(&mut centroids, SortOrder::Percentage);
        let shares: Vec<f32> = centroids.iter().map(|c| c.percentage).collect();
        assert_eq!(shares, vec![0.5, 0.3, 0.2]);

        sort_centroids(&mut centroids, SortOrder::Luminosity);
        let lightness: Vec<f32> = centroids.iter().map(|c| c.lab[0]).collect();
        assert_eq!(lightness, vec![10.0, 40.0, 80.0]);
    }
}
