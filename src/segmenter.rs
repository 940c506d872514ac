use std::path::Path;

use image::{imageops, imageops::FilterType, DynamicImage, GenericImageView, ImageBuffer, Luma};
use ndarray::prelude::*;
use nshare::AsNdarray3;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::errors::{PipelineError, Result};
use crate::imageops::{apply_alpha_mask, AlphaMask};
use crate::traits::BackgroundRemover;

const INPUT_NAME: &str = "image";
const OUTPUT_NAME: &str = "mask";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// ONNX-backed background-removal model.
///
/// The session is created once per stage invocation and holds the device
/// memory for the weights; dropping the segmenter releases it.
pub struct Segmenter {
    image_size: u32,
    session: Mutex<Session>,
}

impl Segmenter {
    pub fn new(model_path: &Path, device_id: i32) -> Result<Self> {
        let mut session = SessionBuilder::new()
            .map_err(|e| PipelineError::Model {
                operation: "session builder initialization".to_string(),
                source: Box::new(e),
            })?
            .with_execution_providers([
                TensorRTExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
                CUDAExecutionProvider::default()
                    .with_device_id(device_id)
                    .build(),
            ])
            .map_err(|e| PipelineError::Model {
                operation: "execution provider configuration".to_string(),
                source: Box::new(e),
            })?
            .with_memory_pattern(true)
            .map_err(|e| PipelineError::Model {
                operation: "memory pattern configuration".to_string(),
                source: Box::new(e),
            })?
            .commit_from_file(model_path)
            .map_err(|e| PipelineError::Model {
                operation: format!("model file loading: {}", model_path.display()),
                source: Box::new(e),
            })?;

        let image_size =
            session.inputs[0]
                .input_type
                .tensor_shape()
                .ok_or_else(|| PipelineError::Model {
                    operation: "model input shape inspection".to_string(),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "tensor shape unavailable",
                    )),
                })?[2] as u32;

        // Warm-up run so provider initialization cost lands here, not on the
        // first image of the batch.
        let data = Array4::<f32>::zeros((1, 3, image_size as usize, image_size as usize));
        session
            .run(ort::inputs![INPUT_NAME => TensorRef::from_array_view(&data)?])
            .map_err(|e| PipelineError::Model {
                operation: "model warm-up run".to_string(),
                source: Box::new(e),
            })?;

        Ok(Self {
            image_size,
            session: Mutex::new(session),
        })
    }

    fn predict(&self, tensor: ArrayView4<f32>) -> Result<Array4<f32>> {
        let mut binding = self.session.lock();
        let outputs = binding.run(
            ort::inputs![INPUT_NAME => TensorRef::from_array_view(&tensor.as_standard_layout())?],
        )?;
        Ok(outputs[OUTPUT_NAME]
            .try_extract_array::<f32>()?
            .into_dimensionality::<Ix4>()?
            .to_owned())
    }
}

impl BackgroundRemover for Segmenter {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage> {
        let rgb = image.to_rgb8();
        let (width, height) = image.dimensions();

        let tensor = preprocess(&rgb, self.image_size);
        let logits = self.predict(tensor.view())?;
        let mask = postprocess_mask(logits, self.image_size, width, height)?;

        let rgba = apply_alpha_mask(&rgb, &mask)?;
        Ok(DynamicImage::ImageRgba8(rgba))
    }

    fn input_size(&self) -> u32 {
        self.image_size
    }
}

/// Resize to the model square and normalize with ImageNet statistics. The
/// model is trained on non-uniform resizes, so no aspect-preserving padding.
pub fn preprocess(image: &image::RgbImage, image_size: u32) -> Array4<f32> {
    let resized = imageops::resize(image, image_size, image_size, FilterType::Lanczos3);
    let mut tensor = resized
        .as_ndarray3()
        .mapv(|v| f32::from(v) / f32::from(u8::MAX))
        .insert_axis(Axis(0));

    for (channel, mut plane) in tensor.axis_iter_mut(Axis(1)).enumerate() {
        plane.mapv_inplace(|v| (v - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]);
    }

    tensor
}

/// Sigmoid over the final prediction tensor, then resize the mask back to
/// the source image dimensions.
pub fn postprocess_mask(
    logits: Array4<f32>,
    image_size: u32,
    width: u32,
    height: u32,
) -> Result<AlphaMask> {
    let probabilities = logits.mapv(|v| 1.0 / (1.0 + (-v).exp()));
    let mask = ImageBuffer::<Luma<f32>, Vec<f32>>::from_raw(
        image_size,
        image_size,
        probabilities.into_raw_vec_and_offset().0,
    )
    .ok_or_else(|| PipelineError::Model {
        operation: "mask tensor reshaping".to_string(),
        source: Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "prediction tensor does not match the model resolution",
        )),
    })?;

    Ok(imageops::resize(&mask, width, height, FilterType::Lanczos3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    #[test]
    fn preprocess_produces_normalized_nchw_tensor() {
        let image = RgbImage::from_pixel(8, 8, Rgb([255, 0, 128]));
        let tensor = preprocess(&image, 4);
        assert_eq!(tensor.shape(), &[1, 3, 4, 4]);

        let red = tensor[[0, 0, 0, 0]];
        assert!((red - (1.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0]).abs() < 1e-5);
        let green = tensor[[0, 1, 0, 0]];
        assert!((green - (0.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1]).abs() < 1e-5);
    }

    #[test]
    fn postprocess_applies_sigmoid_and_restores_dimensions() {
        // Strongly positive logits everywhere: alpha saturates at one.
        let logits = Array4::<f32>::from_elem((1, 1, 4, 4), 20.0);
        let mask = postprocess_mask(logits, 4, 10, 6).unwrap();
        assert_eq!(mask.dimensions(), (10, 6));
        assert!((mask.get_pixel(5, 3).0[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn postprocess_rejects_mismatched_tensor() {
        let logits = Array4::<f32>::zeros((1, 1, 4, 4));
        assert!(postprocess_mask(logits, 8, 10, 10).is_err());
    }
}
