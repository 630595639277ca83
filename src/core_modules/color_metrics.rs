// THEORY:
// Color metric extraction turns an RGB image into the two scalar fields the maskers
// work on: an 8-bit lightness field and a floating-point chroma-magnitude field.
// It is the only stage that looks at raw color; everything downstream sees scalars.

use crate::core_modules::fields::{ChromaField, LightnessField};
use crate::core_modules::pixel::pixel::Pixel;
use crate::error::{Result, SegmentationError};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, RgbImage};
use log::debug;

/// The per-pixel fields derived from one image.
#[derive(Debug, Clone)]
pub struct ColorMetrics {
    /// CIE L* scaled to 0..255.
    pub lightness: LightnessField,
    /// sqrt(a*² + b*²), non-negative.
    pub chroma: ChromaField,
}

/// Accepts any three-channel dynamic image and returns it as 8-bit RGB.
pub fn ensure_rgb(image: &DynamicImage) -> Result<RgbImage> {
    let channels = image.color().channel_count();
    if channels != 3 {
        return Err(SegmentationError::invalid(format!(
            "expected a three-channel image, got {channels} channel(s)"
        )));
    }
    let rgb = image.to_rgb8();
    ensure_not_empty(&rgb)?;
    Ok(rgb)
}

pub fn ensure_not_empty(image: &RgbImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(SegmentationError::invalid("image is empty"));
    }
    Ok(())
}

pub fn extract(image: &RgbImage) -> Result<ColorMetrics> {
    ensure_not_empty(image)?;
    let (width, height) = image.dimensions();

    let mut lightness = GrayImage::new(width, height);
    let mut chroma: ChromaField = ImageBuffer::new(width, height);

    for (x, y, rgb) in image.enumerate_pixels() {
        let lab = Pixel::from(rgb).lab();
        lightness.put_pixel(x, y, Luma([Pixel::lightness_to_byte(lab.lightness)]));
        chroma.put_pixel(x, y, Luma([lab.chroma()]));
    }

    debug!("extracted color metrics for {width}x{height} image");
    Ok(ColorMetrics { lightness, chroma })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayAlphaImage, Rgb, RgbaImage};

    #[test]
    fn fields_match_image_dimensions() {
        let image = RgbImage::from_pixel(7, 5, Rgb([10, 200, 30]));
        let metrics = extract(&image).unwrap();
        assert_eq!(metrics.lightness.dimensions(), (7, 5));
        assert_eq!(metrics.chroma.dimensions(), (7, 5));
    }

    #[test]
    fn chroma_separates_color_from_gray() {
        let mut image = RgbImage::from_pixel(2, 1, Rgb([120, 120, 120]));
        image.put_pixel(1, 0, Rgb([220, 30, 30]));
        let metrics = extract(&image).unwrap();
        assert!(metrics.chroma.get_pixel(0, 0)[0] < 0.05);
        assert!(metrics.chroma.get_pixel(1, 0)[0] > 50.0);
    }

    #[test]
    fn empty_image_is_invalid() {
        let image = RgbImage::new(0, 10);
        assert!(matches!(extract(&image), Err(SegmentationError::InvalidInput(_))));
    }

    #[test]
    fn non_rgb_images_are_rejected() {
        let rgba = DynamicImage::ImageRgba8(RgbaImage::new(4, 4));
        let gray_alpha = DynamicImage::ImageLumaA8(GrayAlphaImage::new(4, 4));
        assert!(ensure_rgb(&rgba).is_err());
        assert!(ensure_rgb(&gray_alpha).is_err());
        assert!(ensure_rgb(&DynamicImage::ImageRgb8(RgbImage::new(4, 4))).is_ok());
    }
}
