pub mod image_helper {
    use crate::core_modules::color_metrics;
    use crate::core_modules::fields::BinaryMask;
    use crate::core_modules::instance::Instance;
    use crate::error::Result;
    use image::{ImageEncoder, Rgb, RgbImage};
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;
    use std::path::Path;

    pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

    /// Decodes an image file and checks it is three-channel.
    pub fn load_rgb(path: &Path) -> Result<RgbImage> {
        let decoded = image::open(path)?;
        color_metrics::ensure_rgb(&decoded)
    }

    /// Copies `image` and outlines every instance box on the copy.
    pub fn draw_boxes(image: &RgbImage, instances: &[Instance], color: Rgb<u8>) -> RgbImage {
        let mut canvas = image.clone();
        for instance in instances {
            let bounding_box = instance.bounding_box;
            let rect = Rect::at(bounding_box.left as i32, bounding_box.top as i32)
                .of_size(bounding_box.width, bounding_box.height);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }
        canvas
    }

    pub fn save_rgb(path: &Path, image: &RgbImage) -> Result<()> {
        save(path, image.width(), image.height(), image.as_raw(), image::ExtendedColorType::Rgb8)
    }

    pub fn save_mask(path: &Path, mask: &BinaryMask) -> Result<()> {
        let image = mask.as_image();
        save(path, image.width(), image.height(), image.as_raw(), image::ExtendedColorType::L8)
    }

    fn save(
        path: &Path,
        width: u32,
        height: u32,
        buffer: &[u8],
        color_type: image::ExtendedColorType,
    ) -> Result<()> {
        let output = std::fs::File::create(path).map_err(image::ImageError::IoError)?;
        let encoder = image::codecs::png::PngEncoder::new(std::io::BufWriter::new(output));

        encoder.write_image(buffer, width, height, color_type)?;

        Ok(())
    }
}
