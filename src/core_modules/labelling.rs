// Connected-component labelling shared by seed generation and instance filtering.
//
// imageproc groups neighbouring pixels of equal value, so an image of region ids
// keeps two touching regions apart even without a boundary line between them. The
// labels are renumbered 1, 2, ... in row-major order of first appearance, which is
// the order every caller reports components in.

use image::{ImageBuffer, Luma};
use imageproc::region_labelling::{Connectivity, connected_components};
use std::collections::HashMap;

/// Per-pixel ids; 0 is background.
pub type RegionImage = ImageBuffer<Luma<u32>, Vec<u32>>;

#[derive(Debug, Clone)]
pub struct Components {
    pub width: u32,
    pub height: u32,
    /// Row-major component labels, 0 for background.
    pub labels: Vec<u32>,
    pub count: u32,
}

impl Components {
    pub fn label_at(&self, x: u32, y: u32) -> u32 {
        self.labels[y as usize * self.width as usize + x as usize]
    }
}

pub fn label_regions(regions: &RegionImage, connectivity: Connectivity) -> Components {
    let (width, height) = regions.dimensions();
    let raw = connected_components(regions, connectivity, Luma([0u32]));

    let mut renumbered: HashMap<u32, u32> = HashMap::new();
    let mut labels = Vec::with_capacity(width as usize * height as usize);
    for pixel in raw.pixels() {
        let label = pixel[0];
        if label == 0 {
            labels.push(0);
            continue;
        }
        let next = renumbered.len() as u32 + 1;
        labels.push(*renumbered.entry(label).or_insert(next));
    }

    Components {
        width,
        height,
        labels,
        count: renumbered.len() as u32,
    }
}
