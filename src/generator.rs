use std::path::Path;

use image::{imageops, imageops::FilterType, DynamicImage, Rgba, RgbaImage};
use ndarray::prelude::*;
use ort::value::TensorRef;
use ort::{
    execution_providers::{CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::SessionBuilder, Session},
};
use parking_lot::Mutex;

use crate::config::Resolution;
use crate::errors::{PipelineError, Result};
use crate::mesh::{AttrLayout, Mesh, VoxelAttrs};
use crate::traits::MeshGenerator;

const IMAGE_INPUT: &str = "image";
const COORDS_NAME: &str = "coords";

const SPARSE_STRUCTURE_MODEL: &str = "sparse_structure.onnx";
const SHAPE_MODEL: &str = "shape_slat.onnx";
const TEXTURE_MODEL: &str = "tex_slat.onnx";

/// ONNX-backed image-to-3D pipeline: sparse structure, then geometry, then
/// appearance. The cascade refinement of the `*_cascade` modes runs inside
/// the exported graphs; this wrapper only selects the conditioning
/// resolution.
pub struct GenerationPipeline {
    sparse_structure: Mutex<Session>,
    shape_decoder: Mutex<Session>,
    texture_decoder: Mutex<Session>,
}

impl GenerationPipeline {
    /// Load all three stages from a model directory. This is the expensive
    /// step; it runs once per stage invocation and device memory is held
    /// until the pipeline is dropped.
    pub fn load(models_dir: &Path, device_id: i32, low_vram: bool) -> Result<Self> {
        Ok(Self {
            sparse_structure: load_session(
                &models_dir.join(SPARSE_STRUCTURE_MODEL),
                device_id,
                low_vram,
            )?,
            shape_decoder: load_session(&models_dir.join(SHAPE_MODEL), device_id, low_vram)?,
            texture_decoder: load_session(&models_dir.join(TEXTURE_MODEL), device_id, low_vram)?,
        })
    }
}

fn load_session(model_path: &Path, device_id: i32, low_vram: bool) -> Result<Mutex<Session>> {
    let session = SessionBuilder::new()
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
        // Memory patterns pre-plan arena allocations and keep them resident;
        // skip them in low-VRAM mode.
        .with_memory_pattern(!low_vram)
        .map_err(|e| PipelineError::Model {
            operation: "memory pattern configuration".to_string(),
            source: Box::new(e),
        })?
        .commit_from_file(model_path)
        .map_err(|e| PipelineError::Model {
            operation: format!("model file loading: {}", model_path.display()),
            source: Box::new(e),
        })?;

    Ok(Mutex::new(session))
}

impl MeshGenerator for GenerationPipeline {
    fn generate(
        &self,
        image: &DynamicImage,
        resolution: Resolution,
        preprocess: bool,
    ) -> Result<Mesh> {
        let rgba = if preprocess {
            flatten_background(image)
        } else {
            image.to_rgba8()
        };
        let size = resolution.image_size();
        let conditioning = image_to_tensor(&imageops::resize(
            &rgba,
            size,
            size,
            FilterType::Lanczos3,
        ));

        // Stage 1: coarse occupancy over the unit cube.
        let (coords, voxel_size) = {
            let mut session = self.sparse_structure.lock();
            let outputs = session.run(ort::inputs![
                IMAGE_INPUT => TensorRef::from_array_view(&conditioning)?
            ])?;
            let coords = outputs[COORDS_NAME]
                .try_extract_array::<i64>()?
                .into_dimensionality::<Ix2>()?
                .to_owned();
            let voxel_size = outputs["voxel_size"]
                .try_extract_array::<f32>()?
                .iter()
                .copied()
                .next()
                .ok_or_else(|| PipelineError::Model {
                    operation: "voxel size extraction".to_string(),
                    source: Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "sparse structure stage returned no voxel size",
                    )),
                })?;
            (coords, voxel_size)
        };

        if coords.is_empty() {
            return Err(PipelineError::Model {
                operation: "sparse structure sampling".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "no occupied voxels predicted for this image",
                )),
            });
        }

        // Stage 2: detailed geometry conditioned on image and occupancy.
        let (vertices, faces) = {
            let mut session = self.shape_decoder.lock();
            let outputs = session.run(ort::inputs![
                IMAGE_INPUT => TensorRef::from_array_view(&conditioning)?,
                COORDS_NAME => TensorRef::from_array_view(&coords)?,
            ])?;
            let vertices = outputs["vertices"]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix2>()?
                .to_owned();
            let faces = outputs["faces"]
                .try_extract_array::<i64>()?
                .into_dimensionality::<Ix2>()?
                .to_owned();
            (vertices, faces)
        };

        // Stage 3: surface appearance per occupied voxel.
        let attrs = {
            let mut session = self.texture_decoder.lock();
            let outputs = session.run(ort::inputs![
                IMAGE_INPUT => TensorRef::from_array_view(&conditioning)?,
                COORDS_NAME => TensorRef::from_array_view(&coords)?,
            ])?;
            outputs["attrs"]
                .try_extract_array::<f32>()?
                .into_dimensionality::<Ix2>()?
                .to_owned()
        };

        assemble_mesh(vertices, faces, coords, attrs, voxel_size)
    }
}

fn assemble_mesh(
    vertices: Array2<f32>,
    faces: Array2<i64>,
    coords: Array2<i64>,
    attrs: Array2<f32>,
    voxel_size: f32,
) -> Result<Mesh> {
    let layout = match attrs.ncols() {
        3 => AttrLayout::Rgb,
        4 => AttrLayout::Rgba,
        channels => {
            return Err(PipelineError::Model {
                operation: "attribute layout detection".to_string(),
                source: Box::new(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unsupported attribute channel count: {channels}"),
                )),
            })
        }
    };

    let vertices = vertices
        .rows()
        .into_iter()
        .map(|row| [row[0], row[1], row[2]])
        .collect();
    let faces = faces
        .rows()
        .into_iter()
        .map(|row| [row[0] as u32, row[1] as u32, row[2] as u32])
        .collect();
    let coords = coords
        .rows()
        .into_iter()
        .map(|row| [row[0] as i32, row[1] as i32, row[2] as i32])
        .collect();

    Ok(Mesh {
        vertices,
        faces,
        attrs: Some(VoxelAttrs {
            coords,
            values: attrs,
            layout,
        }),
        voxel_size,
    })
}

/// Built-in preparation for images that did not go through the
/// background-removal stage: composite over white and force full opacity.
fn flatten_background(image: &DynamicImage) -> RgbaImage {
    let rgba = image.to_rgba8();
    let mut flattened = RgbaImage::new(rgba.width(), rgba.height());
    for (source, target) in rgba.pixels().zip(flattened.pixels_mut()) {
        let Rgba([red, green, blue, alpha]) = *source;
        let alpha = f32::from(alpha) / f32::from(u8::MAX);
        let blend = |channel: u8| {
            (f32::from(channel) * alpha + f32::from(u8::MAX) * (1.0 - alpha)).round() as u8
        };
        *target = Rgba([blend(red), blend(green), blend(blue), u8::MAX]);
    }
    flattened
}

/// RGBA image to a (1, 4, H, W) tensor scaled to [0, 1].
fn image_to_tensor(image: &RgbaImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 4, height as usize, width as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            tensor[[0, channel, y as usize, x as usize]] =
                f32::from(value) / f32::from(u8::MAX);
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tensor_conversion_is_nchw_and_scaled() {
        let mut image = RgbaImage::new(2, 2);
        image.put_pixel(1, 0, Rgba([255, 0, 128, 255]));
        let tensor = image_to_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 4, 2, 2]);
        assert!((tensor[[0, 0, 0, 1]] - 1.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 1]] - 128.0 / 255.0).abs() < 1e-3);
    }

    #[test]
    fn flatten_composites_over_white() {
        let mut image = RgbaImage::new(1, 1);
        image.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let flattened = flatten_background(&DynamicImage::ImageRgba8(image));
        assert_eq!(flattened.get_pixel(0, 0).0, [255, 255, 255, 255]);
    }

    #[test]
    fn assemble_rejects_unknown_attribute_layout() {
        let vertices = Array2::<f32>::zeros((3, 3));
        let faces = Array2::<i64>::zeros((1, 3));
        let coords = Array2::<i64>::zeros((1, 3));
        let attrs = Array2::<f32>::zeros((1, 7));
        assert!(assemble_mesh(vertices, faces, coords, attrs, 0.1).is_err());
    }

    #[test]
    fn assemble_detects_rgb_layout() {
        let vertices = Array2::<f32>::zeros((3, 3));
        let faces = Array2::<i64>::zeros((1, 3));
        let coords = Array2::<i64>::zeros((2, 3));
        let attrs = Array2::<f32>::zeros((2, 3));
        let mesh = assemble_mesh(vertices, faces, coords, attrs, 0.1).unwrap();
        assert_eq!(mesh.attrs.unwrap().layout, AttrLayout::Rgb);
    }
}
