// THEORY:
// Every stage of the segmentation core either returns its output grid or one of
// the errors below. Nothing is retried and nothing is swallowed: the pipeline is
// deterministic, so a failing input fails the same way every time and the caller
// has to fix the input.
//
// `DegenerateInput` is deliberately separate from `InvalidInput`. An image with no
// pills in it is a valid image, and the normal pipeline reports it as an empty
// instance list. Only callers that explicitly require at least one instance turn
// that into an error (see `pipeline::require_instances`).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SegmentationError>;

#[derive(Debug, Error)]
pub enum SegmentationError {
    /// Empty image, wrong channel count, mismatched dimensions, bad mode string or config.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("no instances were found in the image")]
    DegenerateInput,
    #[error("image i/o failed: {0}")]
    ImageIo(#[from] image::ImageError),
    #[error("worker pool failure: {0}")]
    WorkerPool(String),
}

impl SegmentationError {
    pub fn invalid(message: impl Into<String>) -> Self {
        SegmentationError::InvalidInput(message.into())
    }
}
