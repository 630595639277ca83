// THEORY:
// The seed generator converts the fused mask into a marker field for region growing.
//
// 1.  **Edge Carving**: foreground pixels whose color jumps by more than the edge
//     threshold to a foreground 4-neighbour are dropped from the core mask. Two
//     differently colored pills pressed flat against each other leave no neck in the
//     mask, so the seam has to come from color.
// 2.  **Distance Field**: every carved-foreground pixel gets its Euclidean distance to
//     the nearest background pixel. Pixels outside the image count as background, so
//     a pill cut by the frame still has a finite core.
// 3.  **Percentile Cutoff**: the confident-foreground cutoff is the `p`-th percentile of
//     the foreground distances, not their maximum. Every object, large or small,
//     keeps part of its core above the cutoff, while thin necks between touching
//     pills and noisy protrusions fall below it and split into separate cores.
// 4.  **Background Estimate**: the uncarved mask dilated twice with a 5x5 elliptical
//     element. Pixels outside it are confidently background.
// 5.  **Labelling**: each 8-connected confident core becomes a seed region with ids
//     starting at 2 in row-major order of first appearance. Pixels inside the dilated
//     band that are not part of a core are left unknown (0) for the grower to claim.

use crate::core_modules::fields::{BinaryMask, Label, MarkerField};
use crate::core_modules::labelling::{self, RegionImage};
use crate::core_modules::region_grower::{neighbours, step_cost};
use crate::error::{Result, SegmentationError};
use image::{GrayImage, Luma, RgbImage};
use imageproc::distance_transform::euclidean_squared_distance_transform;
use imageproc::region_labelling::Connectivity;
use log::debug;

const BACKGROUND_DILATIONS: usize = 2;

// 5x5 ellipse: full middle rows, single pixel at the top and bottom.
const ELLIPSE_5X5: [(i32, i32); 17] = [
    (0, -2),
    (-2, -1), (-1, -1), (0, -1), (1, -1), (2, -1),
    (-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0),
    (-2, 1), (-1, 1), (0, 1), (1, 1), (2, 1),
    (0, 2),
];

/// Largest per-channel step still treated as the same surface. Pill faces and the
/// shading across them stay well below it; neighbouring pills of different colors
/// usually differ by far more.
pub const DEFAULT_EDGE_THRESHOLD: u8 = 64;

#[derive(Debug, Clone, Copy)]
pub struct SeedGenerator {
    pub foreground_percentile: f64,
    pub edge_threshold: u8,
}

impl SeedGenerator {
    pub fn new(foreground_percentile: f64, edge_threshold: u8) -> Result<Self> {
        if !(foreground_percentile > 0.0 && foreground_percentile < 1.0) {
            return Err(SegmentationError::invalid(format!(
                "foreground percentile must lie in (0, 1), got {foreground_percentile}"
            )));
        }
        Ok(SeedGenerator {
            foreground_percentile,
            edge_threshold,
        })
    }

    /// Builds markers for `fused`, which must match the dimensions of `image`.
    pub fn generate(&self, fused: &BinaryMask, image: &RgbImage) -> Result<MarkerField> {
        if fused.dimensions() != image.dimensions() {
            return Err(SegmentationError::invalid(format!(
                "fused mask is {:?} but the image is {:?}",
                fused.dimensions(),
                image.dimensions()
            )));
        }
        let (width, height) = fused.dimensions();

        // --- 1. Edge Carving ---
        let carved = carve_color_edges(fused, image, self.edge_threshold);

        // --- 2. Distance Field ---
        let distances = distance_to_background(&carved);

        // --- 3. Percentile Cutoff ---
        let foreground_distances: Vec<f64> = distances
            .iter()
            .zip(carved.as_image().pixels())
            .filter(|(_, p)| p[0] != 0)
            .map(|(d, _)| *d)
            .collect();
        let cutoff = percentile_cutoff(foreground_distances, self.foreground_percentile);

        let cores = RegionImage::from_fn(width, height, |x, y| {
            Luma([(distances[y as usize * width as usize + x as usize] > cutoff) as u32])
        });

        // --- 4. Background Estimate ---
        let mut band = fused.clone();
        for _ in 0..BACKGROUND_DILATIONS {
            band = dilate_ellipse_5x5(&band);
        }

        // --- 5. Labelling ---
        let components = labelling::label_regions(&cores, Connectivity::Eight);
        let mut markers = MarkerField::filled(width, height, MarkerField::BACKGROUND);
        for y in 0..height {
            for x in 0..width {
                let component = components.label_at(x, y);
                let label = if component > 0 {
                    component as Label + MarkerField::FIRST_REGION - 1
                } else if band.is_foreground(x, y) {
                    MarkerField::UNKNOWN
                } else {
                    MarkerField::BACKGROUND
                };
                markers.set(x, y, label);
            }
        }

        debug!(
            "seed cutoff {cutoff:.3} at p={}: {} carved pixels, {} seed regions, {} unknown pixels",
            self.foreground_percentile,
            fused.foreground_count() - carved.foreground_count(),
            components.count,
            markers.count_of(MarkerField::UNKNOWN)
        );
        Ok(markers)
    }
}

/// Removes foreground pixels that have a foreground 4-neighbour more than `threshold`
/// away in color. Both sides of a seam are removed, leaving a two-pixel cut.
pub fn carve_color_edges(fused: &BinaryMask, image: &RgbImage, threshold: u8) -> BinaryMask {
    let (width, height) = fused.dimensions();
    BinaryMask::from_fn(width, height, |x, y| {
        fused.is_foreground(x, y)
            && !neighbours(x, y, width, height)
                .any(|(nx, ny)| fused.is_foreground(nx, ny) && step_cost(image, (x, y), (nx, ny)) > threshold)
    })
}

/// Row-major Euclidean distance from each pixel to the nearest background pixel,
/// treating everything outside the image as background. Background pixels are 0.
pub fn distance_to_background(mask: &BinaryMask) -> Vec<f64> {
    let (width, height) = mask.dimensions();
    // Padded copy where background (and the one-pixel frame) is the nonzero target.
    let targets = GrayImage::from_fn(width + 2, height + 2, |x, y| {
        let inside = x >= 1 && y >= 1 && x <= width && y <= height;
        let is_background = !inside || !mask.is_foreground(x - 1, y - 1);
        Luma([if is_background { 255 } else { 0 }])
    });
    let squared = euclidean_squared_distance_transform(&targets);

    let mut distances = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            distances.push(squared.get_pixel(x + 1, y + 1)[0].sqrt());
        }
    }
    distances
}

/// Value at index `round(p * (n - 1))` of the ascending sort, or 0 for no samples.
pub fn percentile_cutoff(mut values: Vec<f64>, percentile: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let index = (percentile * (values.len() - 1) as f64).round() as usize;
    values[index.min(values.len() - 1)]
}

pub fn dilate_ellipse_5x5(mask: &BinaryMask) -> BinaryMask {
    let (width, height) = mask.dimensions();
    BinaryMask::from_fn(width, height, |x, y| {
        ELLIPSE_5X5.iter().any(|(dx, dy)| {
            let nx = x as i64 + *dx as i64;
            let ny = y as i64 + *dy as i64;
            nx >= 0
                && ny >= 0
                && nx < width as i64
                && ny < height as i64
                && mask.is_foreground(nx as u32, ny as u32)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn generator() -> SeedGenerator {
        SeedGenerator::new(0.65, DEFAULT_EDGE_THRESHOLD).unwrap()
    }

    fn plain(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([40, 40, 40]))
    }

    /// A 40x20 block at (30, 40): red on the left half, blue on the right.
    fn red_blue_block() -> (BinaryMask, RgbImage) {
        let inside = |x: u32, y: u32| (30..70).contains(&x) && (40..60).contains(&y);
        let mask = BinaryMask::from_fn(100, 100, inside);
        let image = RgbImage::from_fn(100, 100, |x, y| match (inside(x, y), x < 50) {
            (true, true) => Rgb([255, 0, 0]),
            (true, false) => Rgb([0, 0, 255]),
            _ => Rgb([255, 255, 255]),
        });
        (mask, image)
    }

    fn squares_mask() -> BinaryMask {
        BinaryMask::from_fn(100, 100, |x, y| {
            let inside = |x0: u32, y0: u32| x >= x0 && x < x0 + 20 && y >= y0 && y < y0 + 20;
            inside(10, 10) || inside(60, 60)
        })
    }

    #[test]
    fn percentile_must_be_inside_the_unit_interval() {
        assert!(SeedGenerator::new(0.0, DEFAULT_EDGE_THRESHOLD).is_err());
        assert!(SeedGenerator::new(1.0, DEFAULT_EDGE_THRESHOLD).is_err());
        assert!(SeedGenerator::new(f64::NAN, DEFAULT_EDGE_THRESHOLD).is_err());
        assert!(SeedGenerator::new(0.65, DEFAULT_EDGE_THRESHOLD).is_ok());
    }

    #[test]
    fn percentile_cutoff_picks_the_rounded_rank() {
        let values = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile_cutoff(values.clone(), 0.5), 3.0);
        assert_eq!(percentile_cutoff(values, 0.65), 4.0);
        assert_eq!(percentile_cutoff(Vec::new(), 0.65), 0.0);
    }

    #[test]
    fn distances_measure_to_the_nearest_background() {
        let mask = BinaryMask::from_fn(7, 7, |x, y| (1..6).contains(&x) && (1..6).contains(&y));
        let distances = distance_to_background(&mask);
        assert_eq!(distances[0], 0.0);
        assert_eq!(distances[7 + 1], 1.0);
        assert_eq!(distances[3 * 7 + 3], 3.0);
    }

    #[test]
    fn image_border_counts_as_background() {
        let mask = BinaryMask::from_fn(5, 5, |_, _| true);
        let distances = distance_to_background(&mask);
        assert_eq!(distances[0], 1.0);
        assert_eq!(distances[2 * 5 + 2], 3.0);
    }

    #[test]
    fn separated_squares_get_one_seed_each() {
        let markers = generator().generate(&squares_mask(), &plain(100, 100)).unwrap();
        assert_eq!(markers.region_count(), 2);
        assert_eq!(markers.get(20, 20), 2);
        assert_eq!(markers.get(70, 70), 3);
        assert_eq!(markers.get(10, 10), MarkerField::UNKNOWN);
        assert_eq!(markers.get(45, 45), MarkerField::BACKGROUND);
    }

    #[test]
    fn background_outside_the_band_is_never_unknown() {
        let mask = squares_mask();
        let markers = generator().generate(&mask, &plain(100, 100)).unwrap();
        let band = dilate_ellipse_5x5(&dilate_ellipse_5x5(&mask));
        for y in 0..100 {
            for x in 0..100 {
                if !band.is_foreground(x, y) {
                    assert_eq!(markers.get(x, y), MarkerField::BACKGROUND);
                }
            }
        }
    }

    #[test]
    fn empty_mask_yields_all_background() {
        let markers = generator().generate(&BinaryMask::new(30, 20), &plain(30, 20)).unwrap();
        assert!(markers.labels().iter().all(|l| *l == MarkerField::BACKGROUND));
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let result = generator().generate(&BinaryMask::new(30, 20), &plain(20, 30));
        assert!(matches!(result, Err(SegmentationError::InvalidInput(_))));
    }

    #[test]
    fn color_seam_splits_a_block_without_a_neck() {
        let (mask, image) = red_blue_block();
        let markers = generator().generate(&mask, &image).unwrap();
        assert_eq!(markers.region_count(), 2);
        assert_eq!(markers.get(40, 50), 2);
        assert_eq!(markers.get(60, 50), 3);
        // The seam itself is left for the grower.
        assert_eq!(markers.get(49, 50), MarkerField::UNKNOWN);
        assert_eq!(markers.get(50, 50), MarkerField::UNKNOWN);
    }

    #[test]
    fn uniform_block_keeps_a_single_core() {
        let (mask, _) = red_blue_block();
        let markers = generator().generate(&mask, &plain(100, 100)).unwrap();
        assert_eq!(markers.region_count(), 1);
    }

    #[test]
    fn carving_removes_both_sides_of_a_seam_only() {
        let (mask, image) = red_blue_block();
        let carved = carve_color_edges(&mask, &image, DEFAULT_EDGE_THRESHOLD);
        assert!(!carved.is_foreground(49, 45));
        assert!(!carved.is_foreground(50, 45));
        assert!(carved.is_foreground(48, 45));
        assert!(carved.is_foreground(51, 45));
        // The outline against the white tray is not foreground on both sides.
        assert!(carved.is_foreground(30, 45));
        assert_eq!(carved.foreground_count(), mask.foreground_count() - 40);
        let untouched = carve_color_edges(&mask, &image, u8::MAX);
        assert_eq!(untouched, mask);
    }

    #[test]
    fn ellipse_dilation_reaches_two_pixels_along_axes_only() {
        let mask = BinaryMask::from_fn(9, 9, |x, y| x == 4 && y == 4);
        let dilated = dilate_ellipse_5x5(&mask);
        assert!(dilated.is_foreground(4, 2));
        assert!(dilated.is_foreground(6, 3));
        assert!(!dilated.is_foreground(6, 2));
        assert_eq!(dilated.foreground_count(), 17);
    }
}
