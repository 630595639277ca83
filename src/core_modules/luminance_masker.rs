// THEORY:
// The luminance masker decides foreground from brightness alone.
//
// 1.  **Local contrast normalization**: CLAHE with a clip limit derived from the
//     field's own contrast, so shadows are flattened without blowing up flat regions.
// 2.  **Denoise**: a 3x3 binomial blur.
// 3.  **Polarity**: the Otsu level splits the field in two. Whichever side holds the
//     majority of pixels is the tray, so pills are the darker population on a light
//     tray and the brighter one on a dark tray. A field with a single value has no
//     second population and is all background in either mode.
// 4.  **Threshold**, one of two modes:
//     - `Global`: pixels on the object side of the Otsu level.
//     - `Adaptive`: the tray reference at each pixel is the brightest (or darkest)
//       Gaussian-weighted neighborhood mean within one block. Pixels darker (or
//       brighter) than that reference by a contrast-derived constant are object
//       pixels. Taking the extreme of the neighborhood means keeps the whole object
//       on the object side, not just a rim along its outline. The result is opened
//       to drop speckle and enclosed holes are filled, since a uniform pill interior
//       may sit close to the reference far from its edge.
// 5.  **Closing** with a small elliptical element to seal one-pixel gaps.

use crate::core_modules::clahe::{self, TileGrid};
use crate::core_modules::fields::{BinaryMask, LightnessField};
use crate::error::SegmentationError;
use image::{GrayImage, ImageBuffer, Luma};
use imageproc::distance_transform::Norm;
use imageproc::region_labelling::{Connectivity, connected_components};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

const MIN_BLOCK_SIZE: u32 = 15;
const OFFSET_SCALE: f64 = 0.05;
/// Tray texture (median absolute deviation) is scaled by this before it can raise the offset.
const TRAY_SPREAD_SCALE: f64 = 4.0;
const MIN_OFFSET: f64 = 2.0;
const MAX_OFFSET: f64 = 12.0;

type MeanField = ImageBuffer<Luma<f32>, Vec<f32>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LuminanceMode {
    #[default]
    Adaptive,
    Global,
}

impl FromStr for LuminanceMode {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adaptive" => Ok(LuminanceMode::Adaptive),
            "global" => Ok(LuminanceMode::Global),
            other => Err(SegmentationError::invalid(format!(
                "unknown luminance mode '{other}', expected 'adaptive' or 'global'"
            ))),
        }
    }
}

impl fmt::Display for LuminanceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LuminanceMode::Adaptive => write!(f, "adaptive"),
            LuminanceMode::Global => write!(f, "global"),
        }
    }
}

/// Which side of the tray the objects sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    DarkObjects,
    BrightObjects,
}

impl Polarity {
    /// The majority side of `level` is the tray.
    pub fn of(field: &GrayImage, level: u8) -> Polarity {
        let total = field.width() as u64 * field.height() as u64;
        let above = field.pixels().filter(|p| p[0] > level).count() as u64;
        if above * 2 >= total {
            Polarity::DarkObjects
        } else {
            Polarity::BrightObjects
        }
    }

    fn is_tray(self, value: u8, level: u8) -> bool {
        match self {
            Polarity::DarkObjects => value > level,
            Polarity::BrightObjects => value <= level,
        }
    }
}

/// Parameters for the equalization step.
#[derive(Debug, Clone, Copy)]
pub struct EqualizationParams {
    pub tiles: TileGrid,
    pub clip_min: f64,
    pub clip_max: f64,
}

pub fn luminance_mask(
    lightness: &LightnessField,
    mode: LuminanceMode,
    params: EqualizationParams,
) -> BinaryMask {
    let (width, height) = lightness.dimensions();
    if width == 0 || height == 0 {
        return BinaryMask::new(width, height);
    }

    // --- 1. Contrast-limited equalization ---
    let clip_limit = clahe::clip_limit_for(
        clahe::standard_deviation(lightness),
        params.clip_min,
        params.clip_max,
    );
    let equalized = clahe::equalize(lightness, params.tiles, clip_limit);

    // --- 2. Denoise ---
    let smoothed = binomial_blur_3x3(&equalized);

    // --- 3. Polarity ---
    let first = smoothed.get_pixel(0, 0)[0];
    if smoothed.pixels().all(|p| p[0] == first) {
        debug!("lightness field is flat, no luminance foreground");
        return BinaryMask::new(width, height);
    }
    let level = imageproc::contrast::otsu_level(&smoothed);
    let polarity = Polarity::of(&smoothed, level);

    // --- 4. Threshold ---
    let raw = match mode {
        LuminanceMode::Global => {
            debug!("global luminance threshold at level {level}, {polarity:?}");
            BinaryMask::from_fn(width, height, |x, y| {
                !polarity.is_tray(smoothed.get_pixel(x, y)[0], level)
            })
        }
        LuminanceMode::Adaptive => {
            let block = block_size(width, height);
            let offset = adaptive_offset(&smoothed, level, polarity);
            debug!("adaptive luminance threshold: block {block}, offset {offset:.2}, {polarity:?}");
            let detected = adaptive_threshold(&smoothed, block, offset, polarity);
            let opened = imageproc::morphology::open(detected.as_image(), Norm::L1, 1);
            fill_holes(&BinaryMask::binarize(opened))
        }
    };

    // --- 5. Seal small gaps ---
    let closed = imageproc::morphology::close(raw.as_image(), Norm::L1, 1);
    let mask = BinaryMask::binarize(closed);
    debug!(
        "luminance mask ({mode}, clip {clip_limit:.2}): {} foreground pixels",
        mask.foreground_count()
    );
    mask
}

/// Neighborhood size for adaptive thresholding: `max(15, (min(w,h)/16)*2 + 1)`, always odd.
pub fn block_size(width: u32, height: u32) -> u32 {
    let size = (MIN_BLOCK_SIZE).max((width.min(height) / 16) * 2 + 1);
    if size % 2 == 0 { size + 1 } else { size }
}

/// Gaussian sigma matching a neighborhood of `block` pixels.
pub fn block_sigma(block: u32) -> f32 {
    0.3 * ((block as f32 - 1.0) / 2.0 - 1.0) + 0.8
}

/// `clamp(max(0.05 * stddev, 4 * tray MAD), 2, 12)`. The tray term keeps texture and
/// equalization ripple in the tray from passing as objects.
fn adaptive_offset(field: &GrayImage, level: u8, polarity: Polarity) -> f64 {
    let contrast = OFFSET_SCALE * clahe::standard_deviation(field);
    let tray: Vec<u8> = field
        .pixels()
        .map(|p| p[0])
        .filter(|v| polarity.is_tray(*v, level))
        .collect();
    let texture = TRAY_SPREAD_SCALE * median_absolute_deviation(&tray) as f64;
    contrast.max(texture).clamp(MIN_OFFSET, MAX_OFFSET)
}

fn median_absolute_deviation(values: &[u8]) -> u8 {
    let Some(center) = median(values.iter().copied()) else {
        return 0;
    };
    median(values.iter().map(|v| v.abs_diff(center))).unwrap_or(0)
}

/// Upper median of byte values, through a histogram.
fn median(values: impl Iterator<Item = u8>) -> Option<u8> {
    let mut histogram = [0usize; 256];
    let mut count = 0usize;
    for value in values {
        histogram[value as usize] += 1;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let mut seen = 0usize;
    for (value, bucket) in histogram.iter().enumerate() {
        seen += bucket;
        if seen > count / 2 {
            return Some(value as u8);
        }
    }
    None
}

fn adaptive_threshold(field: &GrayImage, block: u32, offset: f64, polarity: Polarity) -> BinaryMask {
    let (width, height) = field.dimensions();
    let as_float = MeanField::from_fn(width, height, |x, y| Luma([field.get_pixel(x, y)[0] as f32]));
    let means = imageproc::filter::gaussian_blur_f32(&as_float, block_sigma(block));
    let reference = neighborhood_extreme(&means, (block / 2) as usize, polarity);

    let offset = offset as f32;
    BinaryMask::from_fn(width, height, |x, y| {
        let value = field.get_pixel(x, y)[0] as f32;
        let tray = reference[y as usize * width as usize + x as usize];
        match polarity {
            Polarity::DarkObjects => value <= tray - offset,
            Polarity::BrightObjects => value >= tray + offset,
        }
    })
}

/// Row-major max (dark objects) or min (bright objects) over a square of the given
/// radius, clipped to the image. Separable, so the cost does not grow with the radius.
fn neighborhood_extreme(field: &MeanField, radius: usize, polarity: Polarity) -> Vec<f32> {
    let (width, height) = (field.width() as usize, field.height() as usize);
    let prefer = |a: f32, b: f32| match polarity {
        Polarity::DarkObjects => a > b,
        Polarity::BrightObjects => a < b,
    };

    let mut rows = Vec::with_capacity(width * height);
    for row in field.as_raw().chunks(width) {
        rows.extend(sliding_extreme(row, radius, prefer));
    }

    let mut result = vec![0.0f32; width * height];
    let mut column = Vec::with_capacity(height);
    for x in 0..width {
        column.clear();
        column.extend((0..height).map(|y| rows[y * width + x]));
        for (y, value) in sliding_extreme(&column, radius, prefer).into_iter().enumerate() {
            result[y * width + x] = value;
        }
    }
    result
}

/// Monotonic-queue window extreme: `out[i]` is the preferred value in `values[i-r..=i+r]`.
fn sliding_extreme(values: &[f32], radius: usize, prefer: impl Fn(f32, f32) -> bool) -> Vec<f32> {
    let mut window: VecDeque<usize> = VecDeque::new();
    let mut out = Vec::with_capacity(values.len());
    for next in 0..values.len() + radius {
        if next < values.len() {
            while window.back().is_some_and(|&back| !prefer(values[back], values[next])) {
                window.pop_back();
            }
            window.push_back(next);
        }
        if next >= radius {
            let center = next - radius;
            while window.front().is_some_and(|&front| front + radius < center) {
                window.pop_front();
            }
            if let Some(&front) = window.front() {
                out.push(values[front]);
            }
        }
    }
    out
}

/// Marks every background pixel that cannot reach the image border through
/// 4-connected background as foreground.
pub fn fill_holes(mask: &BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }
    let inverted = GrayImage::from_fn(width, height, |x, y| {
        Luma([if mask.is_foreground(x, y) { 0 } else { 255 }])
    });
    let labels = connected_components(&inverted, Connectivity::Four, Luma([0u8]));

    let mut open_to_border = HashSet::new();
    for x in 0..width {
        open_to_border.insert(labels.get_pixel(x, 0)[0]);
        open_to_border.insert(labels.get_pixel(x, height - 1)[0]);
    }
    for y in 0..height {
        open_to_border.insert(labels.get_pixel(0, y)[0]);
        open_to_border.insert(labels.get_pixel(width - 1, y)[0]);
    }

    BinaryMask::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y)[0];
        mask.is_foreground(x, y) || !open_to_border.contains(&label)
    })
}

/// Separable [1 2 1] / 4 blur in both axes, mirrored borders (reflect-101).
pub fn binomial_blur_3x3(field: &GrayImage) -> GrayImage {
    let (width, height) = field.dimensions();
    let horizontal: Vec<u32> = (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| {
                let left = field.get_pixel(reflect(x as i64 - 1, width), y)[0] as u32;
                let center = field.get_pixel(x, y)[0] as u32;
                let right = field.get_pixel(reflect(x as i64 + 1, width), y)[0] as u32;
                left + 2 * center + right
            })
        })
        .collect();
    let at = |x: u32, y: u32| horizontal[y as usize * width as usize + x as usize];
    GrayImage::from_fn(width, height, |x, y| {
        let sum = at(x, reflect(y as i64 - 1, height)) + 2 * at(x, y) + at(x, reflect(y as i64 + 1, height));
        Luma([((sum + 8) / 16) as u8])
    })
}

fn reflect(index: i64, extent: u32) -> u32 {
    let last = extent as i64 - 1;
    if last == 0 {
        return 0;
    }
    let mirrored = if index < 0 {
        -index
    } else if index > last {
        2 * last - index
    } else {
        index
    };
    mirrored.clamp(0, last) as u32
}
