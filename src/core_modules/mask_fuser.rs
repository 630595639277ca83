// THEORY:
// A pixel is foreground only when the brightness detector and the color detector
// agree. Shadows are dark but achromatic and fail the chroma test; specular rims can
// be colorful but fail the luminance test. The intersection is closed afterwards to
// seal the pinholes it leaves behind.

use crate::core_modules::fields::BinaryMask;
use crate::error::{Result, SegmentationError};
use imageproc::distance_transform::Norm;
use log::debug;

/// Logical AND of two masks, before any morphology.
pub fn intersect(luminance: &BinaryMask, chroma: &BinaryMask) -> Result<BinaryMask> {
    if luminance.dimensions() != chroma.dimensions() {
        return Err(SegmentationError::invalid(format!(
            "mask dimensions differ: {:?} vs {:?}",
            luminance.dimensions(),
            chroma.dimensions()
        )));
    }
    let (width, height) = luminance.dimensions();
    Ok(BinaryMask::from_fn(width, height, |x, y| {
        luminance.is_foreground(x, y) && chroma.is_foreground(x, y)
    }))
}

pub fn fuse(luminance: &BinaryMask, chroma: &BinaryMask) -> Result<BinaryMask> {
    let intersection = intersect(luminance, chroma)?;
    let closed = imageproc::morphology::close(intersection.as_image(), Norm::L1, 1);
    let fused = BinaryMask::binarize(closed);
    debug!("fused mask: {} foreground pixels", fused.foreground_count());
    Ok(fused)
}
