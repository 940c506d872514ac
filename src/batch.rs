use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::PipelineConfig;
use crate::errors::{PipelineError, Result};
use crate::export::{export_glb, partial_path, ExportParams};
use crate::mesh::RASTERIZER_FACE_LIMIT;
use crate::traits::{BackgroundRemover, MeshGenerator};

/// Extensions the directory scan accepts, matched case-insensitively.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "webp"];

/// Outcome counters for one stage invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageReport {
    /// Supported-extension images found in the stage's input directory.
    pub total: usize,
    pub processed: usize,
    /// Images whose output already existed.
    pub skipped: usize,
    pub failed: usize,
}

pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_lowercase();
            SUPPORTED_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Non-recursive scan for supported images, sorted for a deterministic
/// processing order.
pub fn collect_images(dir: &Path) -> Vec<PathBuf> {
    let mut images: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| is_supported_image(e.path()))
        .map(|e| e.into_path())
        .collect();
    images.sort();
    images
}

/// Output path for an input image: same basename, new directory and
/// extension.
pub fn output_path(out_dir: &Path, input: &Path, extension: &str) -> PathBuf {
    let stem = input.file_stem().unwrap_or(input.as_os_str());
    out_dir.join(stem).with_extension(extension)
}

/// Checkpoint filter: an image whose output basename already exists is
/// considered done and is never reprocessed.
pub fn pending_images(images: &[PathBuf], out_dir: &Path, extension: &str) -> Vec<PathBuf> {
    images
        .iter()
        .filter(|input| !output_path(out_dir, input, extension).exists())
        .cloned()
        .collect()
}

fn stage_progress(len: usize) -> ProgressBar {
    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            .unwrap()
            .progress_chars("#>-"),
    );
    bar
}

fn ensure_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| PipelineError::FileSystem {
        path: dir.to_path_buf(),
        operation: "output directory creation".to_string(),
        source: e,
    })
}

/// Background-removal stage: `inputs/` to `processed/`.
///
/// Per-image failures are logged and skipped; the loop always runs to the
/// end. The model handle is borrowed, so the caller controls when its device
/// memory is released.
pub fn run_background_removal<M: BackgroundRemover>(
    config: &PipelineConfig,
    model: &M,
) -> Result<StageReport> {
    info!("background removal stage");
    ensure_output_dir(&config.processed_dir)?;

    let images = collect_images(&config.input_dir);
    if images.is_empty() {
        info!("no images found in {}", config.input_dir.display());
        return Ok(StageReport::default());
    }

    let pending = pending_images(&images, &config.processed_dir, "png");
    let mut report = StageReport {
        total: images.len(),
        skipped: images.len() - pending.len(),
        ..StageReport::default()
    };
    if pending.is_empty() {
        info!("all {} images already processed, skipping", images.len());
        return Ok(report);
    }
    info!(
        "found {} images, {} need processing",
        images.len(),
        pending.len()
    );

    let bar = stage_progress(pending.len());
    for input in &pending {
        let output = output_path(&config.processed_dir, input, "png");
        match remove_background_once(model, input, &output) {
            Ok(()) => report.processed += 1,
            Err(e) => {
                report.failed += 1;
                error!("failed to process {}: {e}", input.display());
            }
        }
        bar.inc(1);
    }
    bar.finish();

    info!(
        "background removal complete: {} processed, {} skipped, {} failed",
        report.processed, report.skipped, report.failed
    );
    Ok(report)
}

fn remove_background_once<M: BackgroundRemover>(
    model: &M,
    input: &Path,
    output: &Path,
) -> Result<()> {
    let image = image::open(input).map_err(|e| PipelineError::ImageProcessing {
        path: input.display().to_string(),
        operation: "image loading".to_string(),
        source: Box::new(e),
    })?;

    let cutout = model.remove_background(&image)?;

    // Write through a temp name so an interrupted save never leaves a
    // partial file the checkpoint scan would treat as done.
    let partial = partial_path(output);
    let saved = cutout
        .save_with_format(&partial, ImageFormat::Png)
        .map_err(PipelineError::from)
        .and_then(|()| {
            fs::rename(&partial, output).map_err(|e| PipelineError::FileSystem {
                path: output.to_path_buf(),
                operation: "output rename".to_string(),
                source: e,
            })
        });
    if saved.is_err() {
        let _ = fs::remove_file(&partial);
    }
    saved
}

/// 3D-generation stage: `processed/` to `output/`.
///
/// Generation is the memory-intensive stage; per-image intermediates
/// (conditioning tensors, the mesh, the encoded scene) are dropped at the
/// end of every iteration, success or failure.
pub fn run_generation<G: MeshGenerator>(config: &PipelineConfig, pipeline: &G) -> Result<StageReport> {
    info!("3d generation stage");
    ensure_output_dir(&config.output_dir)?;

    let images = collect_images(&config.processed_dir);
    if images.is_empty() {
        info!("no images found in {}", config.processed_dir.display());
        return Ok(StageReport::default());
    }

    let pending = pending_images(&images, &config.output_dir, "glb");
    let mut report = StageReport {
        total: images.len(),
        skipped: images.len() - pending.len(),
        ..StageReport::default()
    };
    if pending.is_empty() {
        info!("all {} models already generated, skipping", images.len());
        return Ok(report);
    }
    info!(
        "found {} images, {} need processing",
        images.len(),
        pending.len()
    );

    let params = ExportParams::from_config(config);
    let bar = stage_progress(pending.len());
    for input in &pending {
        let output = output_path(&config.output_dir, input, "glb");
        match generate_once(pipeline, config, &params, input, &output) {
            Ok(written) => {
                report.processed += 1;
                info!("saved {} ({written} bytes)", output.display());
            }
            Err(e) => {
                report.failed += 1;
                error!("failed to process {}: {e}", input.display());
            }
        }
        bar.inc(1);
    }
    bar.finish();

    info!(
        "3d generation complete: {} processed, {} skipped, {} failed",
        report.processed, report.skipped, report.failed
    );
    Ok(report)
}

fn generate_once<G: MeshGenerator>(
    pipeline: &G,
    config: &PipelineConfig,
    params: &ExportParams,
    input: &Path,
    output: &Path,
) -> Result<u64> {
    let image = image::open(input).map_err(|e| PipelineError::ImageProcessing {
        path: input.display().to_string(),
        operation: "image loading".to_string(),
        source: Box::new(e),
    })?;

    let mut mesh = pipeline.generate(&image, config.resolution, config.preprocess)?;
    mesh.simplify(RASTERIZER_FACE_LIMIT);

    let partial = partial_path(output);
    let written = export_glb(&mesh, params, &partial).and_then(|written| {
        fs::rename(&partial, output).map_err(|e| PipelineError::FileSystem {
            path: output.to_path_buf(),
            operation: "output rename".to_string(),
            source: e,
        })?;
        Ok(written)
    });
    if written.is_err() {
        let _ = fs::remove_file(&partial);
    }
    written
}
