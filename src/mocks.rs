//! Test doubles for the model seams, used by unit and integration tests so
//! the stage drivers can run without weights or a GPU.

use image::DynamicImage;
use ndarray::Array2;

use crate::config::Resolution;
use crate::errors::{PipelineError, Result};
use crate::mesh::{AttrLayout, Mesh, VoxelAttrs};
use crate::traits::{BackgroundRemover, MeshGenerator};

/// Passes the image through with a fully opaque alpha channel.
#[derive(Debug, Clone)]
pub struct MockBackgroundRemover {
    pub image_size: u32,
}

impl MockBackgroundRemover {
    pub const fn new(image_size: u32) -> Self {
        Self { image_size }
    }
}

impl Default for MockBackgroundRemover {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl BackgroundRemover for MockBackgroundRemover {
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage> {
        Ok(DynamicImage::ImageRgba8(image.to_rgba8()))
    }

    fn input_size(&self) -> u32 {
        self.image_size
    }
}

/// Fails every image, for exercising the per-item failure policy.
#[derive(Debug, Clone, Default)]
pub struct FailingBackgroundRemover;

impl BackgroundRemover for FailingBackgroundRemover {
    fn remove_background(&self, _image: &DynamicImage) -> Result<DynamicImage> {
        Err(PipelineError::Model {
            operation: "mock segmentation".to_string(),
            source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "simulated inference failure")),
        })
    }

    fn input_size(&self) -> u32 {
        1024
    }
}

/// Returns a colored unit cube regardless of the input image.
#[derive(Debug, Clone, Default)]
pub struct MockMeshGenerator;

impl MeshGenerator for MockMeshGenerator {
    fn generate(
        &self,
        _image: &DynamicImage,
        _resolution: Resolution,
        _preprocess: bool,
    ) -> Result<Mesh> {
        Ok(unit_cube())
    }
}

/// Fails every image, for exercising the per-item failure policy.
#[derive(Debug, Clone, Default)]
pub struct FailingMeshGenerator;

impl MeshGenerator for FailingMeshGenerator {
    fn generate(
        &self,
        _image: &DynamicImage,
        _resolution: Resolution,
        _preprocess: bool,
    ) -> Result<Mesh> {
        Err(PipelineError::Model {
            operation: "mock generation".to_string(),
            source: Box::new(std::io::Error::new(std::io::ErrorKind::Other, "simulated pipeline failure")),
        })
    }
}

/// Unit cube centered on the origin with one gray voxel per octant.
pub fn unit_cube() -> Mesh {
    let vertices = vec![
        [-0.5, -0.5, -0.5],
        [0.5, -0.5, -0.5],
        [0.5, 0.5, -0.5],
        [-0.5, 0.5, -0.5],
        [-0.5, -0.5, 0.5],
        [0.5, -0.5, 0.5],
        [0.5, 0.5, 0.5],
        [-0.5, 0.5, 0.5],
    ];
    let faces = vec![
        [0, 1, 2],
        [0, 2, 3],
        [4, 6, 5],
        [4, 7, 6],
        [0, 4, 5],
        [0, 5, 1],
        [3, 2, 6],
        [3, 6, 7],
        [0, 3, 7],
        [0, 7, 4],
        [1, 5, 6],
        [1, 6, 2],
    ];
    let mut coords = Vec::new();
    let mut values = Vec::new();
    for z in 0..2 {
        for y in 0..2 {
            for x in 0..2 {
                coords.push([x, y, z]);
                values.extend([0.5, 0.5, 0.5]);
            }
        }
    }
    Mesh {
        vertices,
        faces,
        attrs: Some(VoxelAttrs {
            coords,
            values: Array2::from_shape_vec((8, 3), values)
                .expect("static cube attribute shape"),
            layout: AttrLayout::Rgb,
        }),
        voxel_size: 0.5,
    }
}
