// THEORY:
// The `InstanceFilter` is the final stage of the segmentation core. It turns the grown
// marker field into countable objects.
//
// Key steps:
// 1.  **Foreground Selection**: every pixel whose label is a region id (> 1) is a
//     candidate. Background (1) and boundary (-1) pixels are not.
// 2.  **Component Labelling**: candidates are grouped into 4-connected components of
//     equal region id, so two grown regions that touch without a boundary line
//     between them still count as two objects.
// 3.  **Area Filter**: components smaller than the minimum area are segmentation noise
//     and are dropped. Survivors keep their component order (row-major order of
//     first appearance).
// 4.  **Data Aggregation**: each survivor's area, bounding box and centroid are
//     packaged into an `Instance`, and the survivors are painted into a clean mask
//     that is closed once to hide the one-pixel seams between touching pills.
// 5.  **Stateless Utility**: nothing is remembered between calls.

use crate::core_modules::fields::{BinaryMask, MarkerField};
use crate::core_modules::instance::{BoundingBox, Instance, Point};
use crate::core_modules::labelling::{self, RegionImage};
use crate::error::{Result, SegmentationError};

pub mod instance_filter {
    use super::*;
    use image::Luma;
    use imageproc::distance_transform::Norm;
    use imageproc::region_labelling::Connectivity;
    use log::debug;

    const MIN_AREA_FLOOR: usize = 64;
    const MIN_AREA_DIVISOR: usize = 10_000;

    /// The filtered result of one marker field.
    #[derive(Debug, Clone)]
    pub struct FilteredInstances {
        /// Retained instances painted foreground, closed once.
        pub mask: BinaryMask,
        pub instances: Vec<Instance>,
        /// The area threshold that was applied.
        pub min_area: usize,
        /// Components dropped by the area filter.
        pub discarded: usize,
    }

    /// `max(64, width * height / 10000)`.
    pub fn default_min_area(width: u32, height: u32) -> usize {
        MIN_AREA_FLOOR.max(width as usize * height as usize / MIN_AREA_DIVISOR)
    }

    struct ComponentStats {
        region_id: i32,
        area: usize,
        top_left: Point,
        bottom_right: Point,
        sum_x: f64,
        sum_y: f64,
    }

    pub fn filter_instances(grown: &MarkerField, min_area: Option<usize>) -> Result<FilteredInstances> {
        if grown.labels().contains(&MarkerField::UNKNOWN) {
            return Err(SegmentationError::invalid(
                "marker field still holds unknown pixels; grow it first",
            ));
        }
        let (width, height) = grown.dimensions();
        let min_area = min_area.unwrap_or_else(|| default_min_area(width, height));

        // --- 1. Foreground Selection ---
        let regions = RegionImage::from_fn(width, height, |x, y| {
            let label = grown.get(x, y);
            Luma([if label > MarkerField::BACKGROUND { label as u32 } else { 0 }])
        });

        // --- 2. Component Labelling ---
        let components = labelling::label_regions(&regions, Connectivity::Four);
        let mut stats: Vec<ComponentStats> = Vec::with_capacity(components.count as usize);
        for y in 0..height {
            for x in 0..width {
                let component = components.label_at(x, y);
                if component == 0 {
                    continue;
                }
                let index = component as usize - 1;
                if index == stats.len() {
                    stats.push(ComponentStats {
                        region_id: grown.get(x, y),
                        area: 0,
                        top_left: Point { x, y },
                        bottom_right: Point { x, y },
                        sum_x: 0.0,
                        sum_y: 0.0,
                    });
                }
                let entry = &mut stats[index];
                entry.area += 1;
                entry.top_left.x = entry.top_left.x.min(x);
                entry.top_left.y = entry.top_left.y.min(y);
                entry.bottom_right.x = entry.bottom_right.x.max(x);
                entry.bottom_right.y = entry.bottom_right.y.max(y);
                entry.sum_x += x as f64;
                entry.sum_y += y as f64;
            }
        }

        // --- 3. Area Filter ---
        let mut retained_components = vec![false; stats.len() + 1];
        let mut instances = Vec::new();
        for (index, entry) in stats.iter().enumerate() {
            if entry.area < min_area {
                continue;
            }
            retained_components[index + 1] = true;

            // --- 4. Data Aggregation ---
            instances.push(Instance {
                id: instances.len() as u32 + 1,
                region_id: entry.region_id,
                area: entry.area,
                bounding_box: BoundingBox::from_corners(entry.top_left, entry.bottom_right),
                centroid: (entry.sum_x / entry.area as f64, entry.sum_y / entry.area as f64),
            });
        }
        let discarded = stats.len() - instances.len();

        let painted = BinaryMask::from_fn(width, height, |x, y| {
            retained_components[components.label_at(x, y) as usize]
        });
        let mask = BinaryMask::binarize(imageproc::morphology::close(painted.as_image(), Norm::L1, 1));

        debug!(
            "instance filter: {} kept, {discarded} below {min_area} px",
            instances.len()
        );
        Ok(FilteredInstances {
            mask,
            instances,
            min_area,
            discarded,
        })
    }
}
