// THEORY:
// This file is the main entry point for the `pill_vision` library crate.
// It exposes the segmentation pipeline (`PillPipeline`), its configuration and
// result types, and the batch runner built on top of it (`ParallelPipeline`).
//
// The individual stages live in `core_modules` and are public so they can be
// composed or tested on their own, but the intended interface is the pipeline:
// an RGB image goes in, a list of counted instances with bounding boxes comes out.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use error::{Result, SegmentationError};
pub use pipeline::{PillPipeline, PipelineConfig, Report, Segmentation};
