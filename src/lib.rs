//! Batch driver that turns a directory of images into textured 3D meshes.
//!
//! Two stages chained by directory convention: background removal
//! (`inputs/` to `processed/`) and 3D generation (`processed/` to
//! `output/`). Both skip images whose output basename already exists, so a
//! run can be interrupted and resumed.

pub mod batch;
pub mod cli;
pub mod config;
pub mod errors;
pub mod export;
pub mod generator;
pub mod imageops;
pub mod mesh;
pub mod segmenter;
pub mod traits;

pub mod mocks;

pub use batch::{run_background_removal, run_generation, StageReport, SUPPORTED_EXTENSIONS};
pub use config::{parse_resolution, PipelineConfig, Resolution};
pub use errors::{PipelineError, Result};
pub use export::{export_glb, ExportParams};
pub use generator::GenerationPipeline;
pub use mesh::{AttrLayout, Mesh, VoxelAttrs, RASTERIZER_FACE_LIMIT};
pub use segmenter::Segmenter;
pub use traits::{BackgroundRemover, MeshGenerator};
