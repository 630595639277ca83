// THEORY:
// The grids that flow between pipeline stages. Every stage allocates and returns its
// own grid; nothing is shared or mutated across stage boundaries.
//
// - `LightnessField` / `ChromaField`: per-pixel scalars produced by color extraction.
// - `BinaryMask`: a gray image restricted to exactly two values, 0 (background) and
//   255 (foreground). The newtype is the only way masks move between stages, so any
//   mask a stage receives is known to be binary.
// - `MarkerField`: signed region labels. 0 is unknown, 1 is confirmed background,
//   2 and up are seed regions, and -1 marks boundary pixels after growth.

use crate::error::{Result, SegmentationError};
use image::{GrayImage, ImageBuffer, Luma};

pub type LightnessField = GrayImage;
pub type ChromaField = ImageBuffer<Luma<f32>, Vec<f32>>;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// A two-valued mask. Foreground pixels are 255, background pixels are 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask(GrayImage);

impl BinaryMask {
    /// An all-background mask.
    pub fn new(width: u32, height: u32) -> Self {
        BinaryMask(GrayImage::new(width, height))
    }

    /// Wraps a gray image, rejecting any value other than 0 or 255.
    pub fn from_gray(image: GrayImage) -> Result<Self> {
        if let Some(value) = image.pixels().map(|p| p[0]).find(|v| *v != FOREGROUND && *v != BACKGROUND) {
            return Err(SegmentationError::invalid(format!(
                "mask is not binary: found value {value}"
            )));
        }
        Ok(BinaryMask(image))
    }

    pub(crate) fn from_fn(width: u32, height: u32, is_foreground: impl Fn(u32, u32) -> bool) -> Self {
        BinaryMask(GrayImage::from_fn(width, height, |x, y| {
            Luma([if is_foreground(x, y) { FOREGROUND } else { BACKGROUND }])
        }))
    }

    /// Normalizes any nonzero value to foreground. Used on the output of
    /// morphology operators, which already produce 0/255.
    pub(crate) fn binarize(mut image: GrayImage) -> Self {
        for pixel in image.pixels_mut() {
            pixel[0] = if pixel[0] == BACKGROUND { BACKGROUND } else { FOREGROUND };
        }
        BinaryMask(image)
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        self.0.get_pixel(x, y)[0] == FOREGROUND
    }

    pub fn foreground_count(&self) -> usize {
        self.0.pixels().filter(|p| p[0] == FOREGROUND).count()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.0
    }

    pub fn into_image(self) -> GrayImage {
        self.0
    }
}

pub type Label = i32;

/// A signed label grid in row-major order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerField {
    width: u32,
    height: u32,
    labels: Vec<Label>,
}

impl MarkerField {
    pub const UNKNOWN: Label = 0;
    pub const BACKGROUND: Label = 1;
    pub const BOUNDARY: Label = -1;
    pub const FIRST_REGION: Label = 2;

    pub fn filled(width: u32, height: u32, label: Label) -> Self {
        MarkerField {
            width,
            height,
            labels: vec![label; width as usize * height as usize],
        }
    }

    pub fn from_labels(width: u32, height: u32, labels: Vec<Label>) -> Result<Self> {
        if labels.len() != width as usize * height as usize {
            return Err(SegmentationError::invalid(format!(
                "marker field of {width}x{height} needs {} labels, got {}",
                width as usize * height as usize,
                labels.len()
            )));
        }
        Ok(MarkerField { width, height, labels })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Label {
        self.labels[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, label: Label) {
        let index = self.index(x, y);
        self.labels[index] = label;
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub(crate) fn labels_mut(&mut self) -> &mut [Label] {
        &mut self.labels
    }

    /// Number of distinct seed or grown region ids (labels >= 2).
    pub fn region_count(&self) -> usize {
        let mut ids: Vec<Label> = self
            .labels
            .iter()
            .copied()
            .filter(|l| *l >= Self::FIRST_REGION)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    pub fn count_of(&self, label: Label) -> usize {
        self.labels.iter().filter(|l| **l == label).count()
    }
}
