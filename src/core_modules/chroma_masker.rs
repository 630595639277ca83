// THEORY:
// The chroma masker decides foreground from color strength alone. Because chroma
// magnitude ignores hue, one cutoff works for pills of any color, and shadows,
// highlights and the neutral tray all fall on the background side.
//
// Two modes:
// - `Otsu`: min-max normalize the float field to bytes and take the Otsu cutoff;
//   everything above it is foreground.
// - `Kmeans`: cluster the raw chroma values into two groups and keep the group with
//   the higher centroid. More robust when the two populations overlap.
//
// A field whose total spread is below `ACHROMATIC_SPREAD` has no colored population
// at all (a blank tray, black or gray pills on a white tray). Chroma then carries no
// evidence either way, so the mask is all foreground and the fused mask is decided
// by luminance alone. Normalizing such a field would amplify rounding noise instead.
//
// Either result is opened with a small elliptical element to remove speckle.

use crate::core_modules::fields::{BinaryMask, ChromaField};
use crate::core_modules::kmeans::{self, KmeansParams};
use crate::error::SegmentationError;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chroma units. A field spanning less than this has no colored population.
pub const ACHROMATIC_SPREAD: f32 = 8.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChromaMode {
    Otsu,
    #[default]
    Kmeans,
}

impl FromStr for ChromaMode {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "otsu" => Ok(ChromaMode::Otsu),
            "kmeans" => Ok(ChromaMode::Kmeans),
            other => Err(SegmentationError::invalid(format!(
                "unknown chroma mode '{other}', expected 'otsu' or 'kmeans'"
            ))),
        }
    }
}

impl fmt::Display for ChromaMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChromaMode::Otsu => write!(f, "otsu"),
            ChromaMode::Kmeans => write!(f, "kmeans"),
        }
    }
}

pub fn chroma_mask(chroma: &ChromaField, mode: ChromaMode) -> BinaryMask {
    let (width, height) = chroma.dimensions();
    let (minimum, maximum) = value_range(chroma);
    if maximum - minimum < ACHROMATIC_SPREAD {
        debug!("chroma spread {:.3} is achromatic, chroma mask abstains", maximum - minimum);
        return BinaryMask::from_fn(width, height, |_, _| true);
    }

    let raw = match mode {
        ChromaMode::Otsu => {
            let normalized = normalize_to_u8(chroma);
            let level = imageproc::contrast::otsu_level(&normalized);
            debug!("chroma otsu level {level}");
            BinaryMask::from_fn(width, height, |x, y| normalized.get_pixel(x, y)[0] > level)
        }
        ChromaMode::Kmeans => {
            let samples = chroma.as_raw();
            match kmeans::two_means(samples, KmeansParams::default()) {
                Some(clusters) => {
                    debug!(
                        "chroma clusters at {:.2} / {:.2}",
                        clusters.low, clusters.high
                    );
                    BinaryMask::from_fn(width, height, |x, y| {
                        clusters.is_high(chroma.get_pixel(x, y)[0] as f64)
                    })
                }
                None => BinaryMask::new(width, height),
            }
        }
    };

    let opened = imageproc::morphology::open(raw.as_image(), Norm::L1, 1);
    let mask = BinaryMask::binarize(opened);
    debug!("chroma mask ({mode}): {} foreground pixels", mask.foreground_count());
    mask
}

/// Min-max normalization to 0..255. A field with `max <= min` maps to all zeros.
pub fn normalize_to_u8(field: &ChromaField) -> GrayImage {
    let (width, height) = field.dimensions();
    let (minimum, maximum) = value_range(field);
    if maximum <= minimum {
        return GrayImage::new(width, height);
    }
    let scale = 255.0 / (maximum - minimum);
    GrayImage::from_fn(width, height, |x, y| {
        let value = (field.get_pixel(x, y)[0] - minimum) * scale;
        Luma([value.round().clamp(0.0, 255.0) as u8])
    })
}

fn value_range(field: &ChromaField) -> (f32, f32) {
    if field.as_raw().is_empty() {
        return (0.0, 0.0);
    }
    field
        .pixels()
        .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p[0]), hi.max(p[0])))
}
