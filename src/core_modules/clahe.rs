// THEORY:
// Contrast-limited adaptive histogram equalization (CLAHE) flattens slow illumination
// gradients, such as the soft shadow a pill casts on the tray, before thresholding.
//
// 1.  **Tiling**: the field is cut into a grid of tiles and each tile gets its own
//     histogram-equalization mapping.
// 2.  **Clipping**: each tile histogram is clipped at `clip_limit * area / 256` and the
//     excess is spread uniformly over all bins. This bounds the slope of the mapping so
//     flat regions are not turned into amplified noise.
// 3.  **Interpolation**: a pixel's output blends the mappings of the four nearest tile
//     centers bilinearly, so tile seams never show.
//
// The clip limit itself adapts to the image: flat, low-contrast fields get a gentle
// limit and high-contrast fields a stronger one (`clip_limit_for`).

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

const BINS: usize = 256;

/// Number of equalization tiles along each axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    pub columns: u32,
    pub rows: u32,
}

impl Default for TileGrid {
    fn default() -> Self {
        TileGrid { columns: 8, rows: 8 }
    }
}

/// Population standard deviation of an 8-bit field.
pub fn standard_deviation(field: &GrayImage) -> f64 {
    let count = field.width() as f64 * field.height() as f64;
    if count == 0.0 {
        return 0.0;
    }
    let mean = field.pixels().map(|p| p[0] as f64).sum::<f64>() / count;
    let variance = field
        .pixels()
        .map(|p| {
            let delta = p[0] as f64 - mean;
            delta * delta
        })
        .sum::<f64>()
        / count;
    variance.sqrt()
}

/// Maps contrast (stddev) linearly into `[clip_min, clip_max]`, saturating at stddev 64.
pub fn clip_limit_for(stddev: f64, clip_min: f64, clip_max: f64) -> f64 {
    clip_min + (stddev / 64.0).clamp(0.0, 1.0) * (clip_max - clip_min)
}

pub fn equalize(field: &GrayImage, tiles: TileGrid, clip_limit: f64) -> GrayImage {
    let (width, height) = field.dimensions();
    if width == 0 || height == 0 {
        return field.clone();
    }
    let columns = tiles.columns.clamp(1, width);
    let rows = tiles.rows.clamp(1, height);

    // --- 1. Per-tile mappings ---
    let mut mappings: Vec<[u8; BINS]> = Vec::with_capacity((columns * rows) as usize);
    for tile_y in 0..rows {
        let (y0, y1) = tile_span(tile_y, rows, height);
        for tile_x in 0..columns {
            let (x0, x1) = tile_span(tile_x, columns, width);
            let mut histogram = [0u32; BINS];
            for y in y0..y1 {
                for x in x0..x1 {
                    histogram[field.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x1 - x0) * (y1 - y0);
            if clip_limit > 0.0 {
                clip_histogram(&mut histogram, clip_limit, area);
            }
            mappings.push(cumulative_mapping(&histogram, area));
        }
    }

    // --- 2. Bilinear blend between tile centers ---
    let tile_width = width as f64 / columns as f64;
    let tile_height = height as f64 / rows as f64;
    let mapping = |tile_x: usize, tile_y: usize| &mappings[tile_y * columns as usize + tile_x];

    GrayImage::from_fn(width, height, |x, y| {
        let (top, bottom, weight_y) = interpolation_cell((y as f64 + 0.5) / tile_height - 0.5, rows);
        let (left, right, weight_x) = interpolation_cell((x as f64 + 0.5) / tile_width - 0.5, columns);
        let value = field.get_pixel(x, y)[0] as usize;

        let upper = (1.0 - weight_x) * mapping(left, top)[value] as f64
            + weight_x * mapping(right, top)[value] as f64;
        let lower = (1.0 - weight_x) * mapping(left, bottom)[value] as f64
            + weight_x * mapping(right, bottom)[value] as f64;
        let blended = (1.0 - weight_y) * upper + weight_y * lower;
        Luma([blended.round().clamp(0.0, 255.0) as u8])
    })
}

fn tile_span(tile: u32, tiles: u32, extent: u32) -> (u32, u32) {
    let start = (tile as u64 * extent as u64 / tiles as u64) as u32;
    let end = ((tile as u64 + 1) * extent as u64 / tiles as u64) as u32;
    (start, end)
}

fn clip_histogram(histogram: &mut [u32; BINS], clip_limit: f64, area: u32) {
    let limit = ((clip_limit * area as f64 / BINS as f64) as u32).max(1);
    let mut excess = 0u32;
    for count in histogram.iter_mut() {
        if *count > limit {
            excess += *count - limit;
            *count = limit;
        }
    }

    let batch = excess / BINS as u32;
    let mut residual = excess - batch * BINS as u32;
    for count in histogram.iter_mut() {
        *count += batch;
    }
    if residual > 0 {
        let step = (BINS / residual as usize).max(1);
        let mut bin = 0;
        while bin < BINS && residual > 0 {
            histogram[bin] += 1;
            residual -= 1;
            bin += step;
        }
    }
}

fn cumulative_mapping(histogram: &[u32; BINS], area: u32) -> [u8; BINS] {
    let mut mapping = [0u8; BINS];
    let scale = 255.0 / area.max(1) as f64;
    let mut running = 0u32;
    for (bin, count) in histogram.iter().enumerate() {
        running += count;
        mapping[bin] = (running as f64 * scale).round().min(255.0) as u8;
    }
    mapping
}

/// Returns the two tile indices to blend and the weight of the second one.
fn interpolation_cell(position: f64, count: u32) -> (usize, usize, f64) {
    let last = count as usize - 1;
    if position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = position.floor() as usize;
    if lower >= last {
        return (last, last, 0.0);
    }
    (lower, lower + 1, position - lower as f64)
}
