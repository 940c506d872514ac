use image::{ImageBuffer, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::errors::{PipelineError, Result};

/// Predicted foreground probability per pixel, same dimensions as the image
/// it masks.
pub type AlphaMask = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Composite a predicted mask as the image's alpha channel.
///
/// Mask values are clamped to [0, 1] before scaling to u8; the color
/// channels are left untouched so downstream consumers decide about
/// premultiplication.
pub fn apply_alpha_mask(image: &RgbImage, mask: &AlphaMask) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(PipelineError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "alpha mask application".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "image {}x{} does not match mask {}x{}",
                    image.width(),
                    image.height(),
                    mask.width(),
                    mask.height()
                ),
            )),
        });
    }

    let pixels = image
        .pixels()
        .zip(mask.pixels())
        .flat_map(|(&Rgb([red, green, blue]), &Luma([alpha]))| {
            let alpha = (alpha.clamp(0.0, 1.0) * f32::from(u8::MAX)).round() as u8;
            [red, green, blue, alpha]
        })
        .collect::<Vec<u8>>();

    ImageBuffer::<Rgba<u8>, _>::from_raw(image.width(), image.height(), pixels).ok_or_else(|| {
        PipelineError::ImageProcessing {
            path: "unknown".to_string(),
            operation: "alpha mask application".to_string(),
            source: Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "failed to assemble RGBA buffer",
            )),
        }
    })
}
