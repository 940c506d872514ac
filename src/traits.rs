use image::DynamicImage;

use crate::config::Resolution;
use crate::errors::Result;
use crate::mesh::Mesh;

/// Abstraction over the background-removal model.
///
/// The concrete implementation wraps an ONNX session; tests substitute mocks
/// so the stage drivers can run without model weights or a GPU.
pub trait BackgroundRemover: Send + Sync {
    /// Predict a foreground mask and composite it as the image's alpha
    /// channel. The result is always RGBA.
    fn remove_background(&self, image: &DynamicImage) -> Result<DynamicImage>;

    /// Fixed square input resolution of the underlying model.
    fn input_size(&self) -> u32;
}

/// Abstraction over the image-to-3D generation pipeline.
pub trait MeshGenerator: Send + Sync {
    /// Run the full pipeline on one image. `preprocess` enables the
    /// pipeline's built-in image preparation; the batch driver passes false
    /// because background removal runs as a separate stage.
    fn generate(
        &self,
        image: &DynamicImage,
        resolution: Resolution,
        preprocess: bool,
    ) -> Result<Mesh>;
}
