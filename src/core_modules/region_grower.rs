// THEORY:
// Region growing resolves every unknown marker pixel. It sits behind the
// `RegionGrower` trait so the flooding strategy can be swapped; the contract every
// implementation keeps is:
// - input markers hold 0 (unknown), 1 (background) or >= 2 (seed region);
// - output markers hold no 0: each pixel is background, a region id, or -1 where two
//   different regions meet;
// - identical inputs always give identical outputs.
//
// `PriorityFlood` is a marker-controlled watershed:
// 1.  **Cost**: stepping between neighbours costs the largest per-channel color
//     difference between them, so flat pill interiors are free to cross and color
//     edges are expensive.
// 2.  **Frontier**: every labelled pixel pushes its unknown 4-neighbours with that
//     step cost. The heap pops the cheapest entry first; equal costs pop in push
//     order, and the initial pushes follow row-major order.
// 3.  **Claiming**: a popped pixel joins the region that pushed it, unless it already
//     touches a different seed region, in which case it becomes a boundary pixel (-1)
//     and does not propagate further. Background fronts claim pixels too but never
//     create boundaries.
// 4.  **Leftovers**: pixels no front reached become background.

use crate::core_modules::fields::{Label, MarkerField};
use crate::error::{Result, SegmentationError};
use image::RgbImage;
use log::debug;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

static NEIGHBOURS: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

pub trait RegionGrower: Send + Sync {
    fn grow(&self, image: &RgbImage, markers: &MarkerField) -> Result<MarkerField>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityFlood;

// (cost, push order, pixel index, claiming label)
type FloodEntry = Reverse<(u8, u64, usize, Label)>;

impl RegionGrower for PriorityFlood {
    fn grow(&self, image: &RgbImage, markers: &MarkerField) -> Result<MarkerField> {
        validate(image, markers)?;
        let (width, height) = markers.dimensions();
        let mut grown = markers.clone();
        let mut frontier: BinaryHeap<FloodEntry> = BinaryHeap::new();
        let mut pushes = 0u64;

        // --- 1. Seed the frontier from every labelled pixel ---
        for y in 0..height {
            for x in 0..width {
                let label = grown.get(x, y);
                if label != MarkerField::UNKNOWN {
                    push_neighbours(image, &grown, x, y, label, &mut frontier, &mut pushes);
                }
            }
        }

        // --- 2. Flood in cost order ---
        let mut boundaries = 0usize;
        while let Some(Reverse((_, _, index, label))) = frontier.pop() {
            let x = (index % width as usize) as u32;
            let y = (index / width as usize) as u32;
            if grown.get(x, y) != MarkerField::UNKNOWN {
                continue;
            }

            if label >= MarkerField::FIRST_REGION && touches_other_region(&grown, x, y, label) {
                grown.set(x, y, MarkerField::BOUNDARY);
                boundaries += 1;
                continue;
            }

            grown.set(x, y, label);
            push_neighbours(image, &grown, x, y, label, &mut frontier, &mut pushes);
        }

        // --- 3. Unreached pixels fall back to background ---
        for label in grown.labels_mut().iter_mut() {
            if *label == MarkerField::UNKNOWN {
                *label = MarkerField::BACKGROUND;
            }
        }

        debug!("flood finished: {pushes} pushes, {boundaries} boundary pixels");
        Ok(grown)
    }
}

fn validate(image: &RgbImage, markers: &MarkerField) -> Result<()> {
    if image.dimensions() != markers.dimensions() {
        return Err(SegmentationError::invalid(format!(
            "markers are {:?} but the image is {:?}",
            markers.dimensions(),
            image.dimensions()
        )));
    }
    if let Some(label) = markers.labels().iter().find(|l| **l < MarkerField::UNKNOWN) {
        return Err(SegmentationError::invalid(format!(
            "markers before growth must be >= 0, found {label}"
        )));
    }
    Ok(())
}

pub(crate) fn neighbours(x: u32, y: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
    NEIGHBOURS.iter().filter_map(move |(dx, dy)| {
        let nx = x as i64 + dx;
        let ny = y as i64 + dy;
        (nx >= 0 && ny >= 0 && nx < width as i64 && ny < height as i64).then_some((nx as u32, ny as u32))
    })
}

fn push_neighbours(
    image: &RgbImage,
    grown: &MarkerField,
    x: u32,
    y: u32,
    label: Label,
    frontier: &mut BinaryHeap<FloodEntry>,
    pushes: &mut u64,
) {
    for (nx, ny) in neighbours(x, y, grown.width(), grown.height()) {
        if grown.get(nx, ny) == MarkerField::UNKNOWN {
            let cost = step_cost(image, (x, y), (nx, ny));
            frontier.push(Reverse((cost, *pushes, grown.index(nx, ny), label)));
            *pushes += 1;
        }
    }
}

fn touches_other_region(grown: &MarkerField, x: u32, y: u32, label: Label) -> bool {
    neighbours(x, y, grown.width(), grown.height()).any(|(nx, ny)| {
        let other = grown.get(nx, ny);
        other >= MarkerField::FIRST_REGION && other != label
    })
}

/// Largest per-channel absolute difference between two pixels.
pub fn step_cost(image: &RgbImage, from: (u32, u32), to: (u32, u32)) -> u8 {
    let a = image.get_pixel(from.0, from.1);
    let b = image.get_pixel(to.0, to.1);
    (0..3).map(|c| a[c].abs_diff(b[c])).max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn two_tone_image() -> RgbImage {
        // Left half yellow, right half blue, 10x4.
        RgbImage::from_fn(10, 4, |x, _| if x < 5 { Rgb([255, 255, 0]) } else { Rgb([0, 0, 255]) })
    }

    fn unknown_with_seeds(seeds: &[(u32, u32, Label)]) -> MarkerField {
        let mut markers = MarkerField::filled(10, 4, MarkerField::UNKNOWN);
        for (x, y, label) in seeds {
            markers.set(*x, *y, *label);
        }
        markers
    }

    #[test]
    fn no_unknown_pixels_survive_growth() {
        let markers = unknown_with_seeds(&[(0, 0, 2)]);
        let grown = PriorityFlood.grow(&two_tone_image(), &markers).unwrap();
        assert!(grown.labels().iter().all(|l| *l != MarkerField::UNKNOWN));
        assert!(grown.labels().iter().all(|l| *l == 2));
    }

    #[test]
    fn touching_regions_split_on_the_color_edge() {
        let markers = unknown_with_seeds(&[(1, 1, 2), (8, 2, 3)]);
        let grown = PriorityFlood.grow(&two_tone_image(), &markers).unwrap();
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(grown.get(x, y), 2, "({x},{y})");
            }
            for x in 6..10 {
                assert_eq!(grown.get(x, y), 3, "({x},{y})");
            }
            // The fronts meet on one side or the other of the seam.
            let seam = [grown.get(4, y), grown.get(5, y)];
            assert!(seam == [2, MarkerField::BOUNDARY] || seam == [MarkerField::BOUNDARY, 3], "row {y}: {seam:?}");
        }
    }

    #[test]
    fn background_fronts_never_create_boundaries() {
        let markers = unknown_with_seeds(&[(1, 1, 2), (9, 0, MarkerField::BACKGROUND)]);
        let grown = PriorityFlood.grow(&two_tone_image(), &markers).unwrap();
        assert_eq!(grown.count_of(MarkerField::BOUNDARY), 0);
        assert_eq!(grown.get(4, 3), 2);
        assert_eq!(grown.get(5, 3), MarkerField::BACKGROUND);
    }

    #[test]
    fn isolated_unknown_pixels_become_background() {
        let markers = MarkerField::filled(10, 4, MarkerField::UNKNOWN);
        let grown = PriorityFlood.grow(&two_tone_image(), &markers).unwrap();
        assert!(grown.labels().iter().all(|l| *l == MarkerField::BACKGROUND));
    }

    #[test]
    fn rejects_boundary_labels_in_the_input() {
        let markers = unknown_with_seeds(&[(0, 0, MarkerField::BOUNDARY)]);
        assert!(PriorityFlood.grow(&two_tone_image(), &markers).is_err());
    }

    #[test]
    fn rejects_mismatched_dimensions() {
        let markers = MarkerField::filled(4, 10, MarkerField::UNKNOWN);
        assert!(matches!(
            PriorityFlood.grow(&two_tone_image(), &markers),
            Err(SegmentationError::InvalidInput(_))
        ));
    }

    #[test]
    fn step_cost_is_the_largest_channel_difference() {
        let image = two_tone_image();
        assert_eq!(step_cost(&image, (0, 0), (1, 0)), 0);
        assert_eq!(step_cost(&image, (4, 0), (5, 0)), 255);
    }
}
