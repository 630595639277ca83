// THEORY:
// The `pipeline` module is the top-level API of the segmentation engine. It chains
// the core stages into two calls that mirror how a driver uses them:
//
//   fuse:    image -> {lightness, chroma} -> {luminance mask, chroma mask} -> fused mask
//   segment: fused mask -> seed markers -> grown markers -> filtered instances
//
// Data flows strictly forward and every intermediate grid is returned to the caller,
// so a run can be inspected stage by stage. A `PillPipeline` holds only its
// configuration and growth strategy; processing an image never mutates it, so one
// pipeline can be shared across threads.

use crate::core_modules::chroma_masker::{self, ChromaMode};
use crate::core_modules::clahe::TileGrid;
use crate::core_modules::color_metrics::{self, ColorMetrics};
use crate::core_modules::fields::{BinaryMask, MarkerField};
use crate::core_modules::instance_filter::instance_filter;
use crate::core_modules::luminance_masker::{self, EqualizationParams, LuminanceMode};
use crate::core_modules::mask_fuser;
use crate::core_modules::region_grower::{PriorityFlood, RegionGrower};
use crate::core_modules::seed_generator::{DEFAULT_EDGE_THRESHOLD, SeedGenerator};
use crate::error::{Result, SegmentationError};
use image::RgbImage;
use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use crate::core_modules::instance::{BoundingBox, Instance};

/// Configuration for the PillPipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub luminance_mode: LuminanceMode,
    pub chroma_mode: ChromaMode,
    /// Percentile of foreground distances used as the confident-core cutoff, in (0, 1).
    pub foreground_percentile: f64,
    /// Largest per-channel color step inside one pill; stronger steps split seeds.
    pub edge_threshold: u8,
    /// CLAHE tile grid.
    pub tile_grid: TileGrid,
    /// Lower end of the CLAHE clip-limit range, used for flat images.
    pub clip_min: f64,
    /// Upper end of the CLAHE clip-limit range, used for high-contrast images.
    pub clip_max: f64,
    /// Minimum instance area in pixels. `None` derives it from the image size.
    pub min_area: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            luminance_mode: LuminanceMode::Adaptive,
            chroma_mode: ChromaMode::Kmeans,
            foreground_percentile: 0.65,
            edge_threshold: DEFAULT_EDGE_THRESHOLD,
            tile_grid: TileGrid::default(),
            clip_min: 1.5,
            clip_max: 5.0,
            min_area: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.foreground_percentile > 0.0 && self.foreground_percentile < 1.0) {
            return Err(SegmentationError::invalid(format!(
                "foreground_percentile must lie in (0, 1), got {}",
                self.foreground_percentile
            )));
        }
        if !(self.clip_min > 0.0 && self.clip_min <= self.clip_max) {
            return Err(SegmentationError::invalid(format!(
                "clip range [{}, {}] is not a positive, ordered range",
                self.clip_min, self.clip_max
            )));
        }
        if self.tile_grid.columns == 0 || self.tile_grid.rows == 0 {
            return Err(SegmentationError::invalid("tile grid needs at least one tile per axis"));
        }
        Ok(())
    }

    fn equalization(&self) -> EqualizationParams {
        EqualizationParams {
            tiles: self.tile_grid,
            clip_min: self.clip_min,
            clip_max: self.clip_max,
        }
    }
}

/// Everything produced by the fusion half of the pipeline.
#[derive(Debug, Clone)]
pub struct FusionOutputs {
    pub metrics: ColorMetrics,
    pub luminance_mask: BinaryMask,
    pub chroma_mask: BinaryMask,
    pub fused_mask: BinaryMask,
}

/// The full result of segmenting one image.
#[derive(Debug, Clone)]
pub struct Segmentation {
    pub fusion: FusionOutputs,
    /// Markers before growth.
    pub markers: MarkerField,
    /// Markers after growth.
    pub grown: MarkerField,
    /// Retained instances only, closed once.
    pub instance_mask: BinaryMask,
    pub instances: Vec<Instance>,
}

impl Segmentation {
    pub fn count(&self) -> usize {
        self.instances.len()
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.instances.iter().map(|i| i.bounding_box).collect()
    }

    pub fn report(&self) -> Report {
        if self.instances.is_empty() {
            Report::NoInstances
        } else {
            Report::Instances(self.instances.clone())
        }
    }
}

/// The high-level outcome for a single image.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    NoInstances,
    Instances(Vec<Instance>),
}

/// The main, top-level struct for the segmentation engine.
pub struct PillPipeline {
    config: PipelineConfig,
    seeds: SeedGenerator,
    grower: Box<dyn RegionGrower>,
}

impl std::fmt::Debug for PillPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PillPipeline").field("config", &self.config).finish_non_exhaustive()
    }
}

impl PillPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_grower(config, Box::new(PriorityFlood))
    }

    pub fn with_grower(config: PipelineConfig, grower: Box<dyn RegionGrower>) -> Result<Self> {
        config.validate()?;
        let seeds = SeedGenerator::new(config.foreground_percentile, config.edge_threshold)?;
        Ok(Self { config, seeds, grower })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fuse(&self, image: &RgbImage) -> Result<FusionOutputs> {
        // Stage 1: Color Metrics
        let metrics = color_metrics::extract(image)?;

        // Stage 2: Independent Masks
        let luminance_mask = luminance_masker::luminance_mask(
            &metrics.lightness,
            self.config.luminance_mode,
            self.config.equalization(),
        );
        let chroma_mask = chroma_masker::chroma_mask(&metrics.chroma, self.config.chroma_mode);

        // Stage 3: Fusion
        let fused_mask = mask_fuser::fuse(&luminance_mask, &chroma_mask)?;

        Ok(FusionOutputs {
            metrics,
            luminance_mask,
            chroma_mask,
            fused_mask,
        })
    }

    pub fn segment_fused(&self, image: &RgbImage, fusion: FusionOutputs) -> Result<Segmentation> {
        // Stage 4: Seeding
        let markers = self.seeds.generate(&fusion.fused_mask, image)?;

        // Stage 5: Growth
        let grown = self.grower.grow(image, &markers)?;

        // Stage 6: Filtering
        let filtered = instance_filter::filter_instances(&grown, self.config.min_area)?;

        if filtered.instances.is_empty() {
            warn!("no instances found in {}x{} image", image.width(), image.height());
        } else {
            info!(
                "found {} instance(s) ({} discarded below {} px)",
                filtered.instances.len(),
                filtered.discarded,
                filtered.min_area
            );
        }

        Ok(Segmentation {
            fusion,
            markers,
            grown,
            instance_mask: filtered.mask,
            instances: filtered.instances,
        })
    }

    pub fn segment(&self, image: &RgbImage) -> Result<Segmentation> {
        let fusion = self.fuse(image)?;
        self.segment_fused(image, fusion)
    }

    pub fn count(&self, image: &RgbImage) -> Result<usize> {
        Ok(self.segment(image)?.count())
    }
}

/// Turns an empty result into `DegenerateInput`, for callers that need at least one instance.
pub fn require_instances(segmentation: &Segmentation) -> Result<&[Instance]> {
    if segmentation.instances.is_empty() {
        return Err(SegmentationError::DegenerateInput);
    }
    Ok(&segmentation.instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn canvas(background: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(100, 100, Rgb(background))
    }

    fn paint(image: &mut RgbImage, left: u32, top: u32, size: u32, color: [u8; 3]) {
        for y in top..top + size {
            for x in left..left + size {
                image.put_pixel(x, y, Rgb(color));
            }
        }
    }

    fn separated_squares(color: [u8; 3]) -> RgbImage {
        let mut image = canvas([255, 255, 255]);
        paint(&mut image, 10, 10, 20, color);
        paint(&mut image, 60, 60, 20, color);
        image
    }

    fn separated_blue_squares() -> RgbImage {
        separated_squares([0, 0, 255])
    }

    fn touching_red_and_blue() -> RgbImage {
        let mut image = canvas([255, 255, 255]);
        paint(&mut image, 30, 40, 20, [255, 0, 0]);
        paint(&mut image, 50, 40, 20, [0, 0, 255]);
        image
    }

    fn touching_yellow_and_blue() -> RgbImage {
        let mut image = canvas([30, 30, 30]);
        paint(&mut image, 30, 40, 20, [255, 255, 0]);
        paint(&mut image, 50, 40, 20, [0, 0, 255]);
        image
    }

    fn global(chroma_mode: ChromaMode) -> PipelineConfig {
        PipelineConfig {
            luminance_mode: LuminanceMode::Global,
            chroma_mode,
            ..PipelineConfig::default()
        }
    }

    fn close_to(actual: u32, expected: u32) -> bool {
        actual.abs_diff(expected) <= 2
    }

    fn assert_two_squares(segmentation: &Segmentation, label: &str) {
        assert_eq!(segmentation.count(), 2, "{label}");
        for (bounding_box, corner) in segmentation.boxes().iter().zip([10u32, 60]) {
            assert!(close_to(bounding_box.left, corner), "{label}: {bounding_box:?}");
            assert!(close_to(bounding_box.top, corner), "{label}: {bounding_box:?}");
            assert!(close_to(bounding_box.width, 20), "{label}: {bounding_box:?}");
            assert!(close_to(bounding_box.height, 20), "{label}: {bounding_box:?}");
        }
        assert_eq!(segmentation.grown.count_of(MarkerField::BOUNDARY), 0, "{label}");
    }

    #[test]
    fn default_config_matches_the_reference_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.luminance_mode, LuminanceMode::Adaptive);
        assert_eq!(config.chroma_mode, ChromaMode::Kmeans);
        assert_eq!(config.foreground_percentile, 0.65);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad_percentile = PipelineConfig { foreground_percentile: 1.2, ..PipelineConfig::default() };
        let bad_clip = PipelineConfig { clip_min: 6.0, ..PipelineConfig::default() };
        let bad_tiles = PipelineConfig {
            tile_grid: TileGrid { columns: 0, rows: 8 },
            ..PipelineConfig::default()
        };
        for config in [bad_percentile, bad_clip, bad_tiles] {
            assert!(matches!(PillPipeline::new(config), Err(SegmentationError::InvalidInput(_))));
        }
    }

    #[test]
    fn two_separated_squares_give_two_boxes() {
        for chroma_mode in [ChromaMode::Otsu, ChromaMode::Kmeans] {
            let pipeline = PillPipeline::new(global(chroma_mode)).unwrap();
            let segmentation = pipeline.segment(&separated_blue_squares()).unwrap();
            assert_two_squares(&segmentation, &chroma_mode.to_string());
        }
    }

    #[test]
    fn colored_squares_on_white_give_two_boxes_with_defaults() {
        let pipeline = PillPipeline::new(PipelineConfig::default()).unwrap();
        for (name, color) in [("blue", [0, 0, 255]), ("red", [255, 0, 0])] {
            let segmentation = pipeline.segment(&separated_squares(color)).unwrap();
            assert_two_squares(&segmentation, name);
        }
    }

    #[test]
    fn black_squares_on_white_give_two_boxes() {
        let image = separated_squares([0, 0, 0]);
        for config in [PipelineConfig::default(), global(ChromaMode::Otsu), global(ChromaMode::Kmeans)] {
            let label = format!("{}/{}", config.luminance_mode, config.chroma_mode);
            let segmentation = PillPipeline::new(config).unwrap().segment(&image).unwrap();
            // No colored population, so chroma leaves the decision to luminance.
            assert_eq!(segmentation.fusion.chroma_mask.foreground_count(), 100 * 100, "{label}");
            assert_two_squares(&segmentation, &label);
        }
    }

    #[test]
    fn touching_red_and_blue_on_white_split_at_the_seam() {
        let pipeline = PillPipeline::new(PipelineConfig::default()).unwrap();
        let segmentation = pipeline.segment(&touching_red_and_blue()).unwrap();
        assert_eq!(segmentation.count(), 2);

        let boxes = segmentation.boxes();
        assert!(boxes[0].right() <= 50 && boxes[1].left >= 49, "{boxes:?}");
        assert!(close_to(boxes[0].left, 30) && close_to(boxes[1].right(), 69), "{boxes:?}");
        for bounding_box in &boxes {
            assert!(close_to(bounding_box.top, 40) && close_to(bounding_box.height, 20), "{boxes:?}");
        }
    }

    #[test]
    fn touching_squares_on_a_dark_tray_split_at_the_shared_edge() {
        let pipeline = PillPipeline::new(PipelineConfig::default()).unwrap();
        let segmentation = pipeline.segment(&touching_yellow_and_blue()).unwrap();
        assert_eq!(segmentation.count(), 2);

        let boxes = segmentation.boxes();
        assert!(boxes[0].right() < 51 && boxes[1].left >= 49, "{boxes:?}");
        assert!(close_to(boxes[0].left, 30) && close_to(boxes[1].right(), 69), "{boxes:?}");
        assert!(segmentation.grown.count_of(MarkerField::BOUNDARY) > 0);
    }

    #[test]
    fn blank_image_has_no_instances_and_no_error() {
        let pipeline = PillPipeline::new(PipelineConfig::default()).unwrap();
        let segmentation = pipeline.segment(&canvas([255, 255, 255])).unwrap();
        assert_eq!(segmentation.fusion.fused_mask.foreground_count(), 0);
        assert!(segmentation.markers.labels().iter().all(|l| *l == MarkerField::BACKGROUND));
        assert!(segmentation.instances.is_empty());
        assert!(segmentation.boxes().is_empty());
        assert_eq!(segmentation.report(), Report::NoInstances);
        assert!(matches!(require_instances(&segmentation), Err(SegmentationError::DegenerateInput)));
    }

    #[test]
    fn stage_invariants_hold() {
        for config in [PipelineConfig::default(), global(ChromaMode::Otsu)] {
            let pipeline = PillPipeline::new(config).unwrap();
            for image in [separated_blue_squares(), touching_yellow_and_blue(), touching_red_and_blue()] {
                let segmentation = pipeline.segment(&image).unwrap();
                let fusion = &segmentation.fusion;
                for mask in [&fusion.luminance_mask, &fusion.chroma_mask, &fusion.fused_mask] {
                    assert!(mask.as_image().pixels().all(|p| p[0] == 0 || p[0] == 255));
                }

                let raw = mask_fuser::intersect(&fusion.luminance_mask, &fusion.chroma_mask).unwrap();
                for (x, y, p) in raw.as_image().enumerate_pixels() {
                    if p[0] == 255 {
                        assert!(fusion.luminance_mask.is_foreground(x, y));
                        assert!(fusion.chroma_mask.is_foreground(x, y));
                    }
                }

                assert!(segmentation.grown.labels().iter().all(|l| *l != MarkerField::UNKNOWN));
                let min_area = instance_filter::default_min_area(image.width(), image.height());
                assert!(segmentation.instances.iter().all(|i| i.area >= min_area));
            }
        }
    }

    #[test]
    fn repeated_runs_are_identical() {
        let pipeline = PillPipeline::new(PipelineConfig::default()).unwrap();
        let image = touching_yellow_and_blue();
        let first = pipeline.segment(&image).unwrap();
        let second = pipeline.segment(&image).unwrap();
        assert_eq!(first.fusion.fused_mask, second.fusion.fused_mask);
        assert_eq!(first.markers, second.markers);
        assert_eq!(first.grown, second.grown);
        assert_eq!(first.instance_mask, second.instance_mask);
        assert_eq!(first.instances, second.instances);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = PipelineConfig {
            luminance_mode: LuminanceMode::Global,
            min_area: Some(120),
            ..PipelineConfig::default()
        };
        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("\"global\""));
        let parsed: PipelineConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, config);

        let partial: PipelineConfig = serde_json::from_str(r#"{"chroma_mode":"otsu"}"#).unwrap();
        assert_eq!(partial.chroma_mode, ChromaMode::Otsu);
        assert_eq!(partial.foreground_percentile, 0.65);
        assert_eq!(partial.edge_threshold, DEFAULT_EDGE_THRESHOLD);
    }
}
