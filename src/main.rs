use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use img2mesh_rs::cli::Cli;
use img2mesh_rs::{
    parse_resolution, run_background_removal, run_generation, GenerationPipeline, PipelineConfig,
    Segmenter,
};

fn main() -> Result<()> {
    // Consumed by the external runtimes; must be set before any session is
    // created.
    std::env::set_var("OPENCV_IO_ENABLE_OPENEXR", "1");
    std::env::set_var("CUDA_MODULE_LOADING", "LAZY");

    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(level.parse().expect("static directive")),
        )
        .init();

    let mut config = PipelineConfig::default();
    if let Some(value) = &cli.resolution {
        match parse_resolution(value) {
            Ok((resolution, vram_hint)) => {
                info!("using resolution {resolution} ({vram_hint})");
                config.resolution = resolution;
            }
            Err(message) => {
                warn!("{message}");
                warn!("falling back to default resolution {}", config.resolution);
            }
        }
    }

    if cli.run_background() {
        let model = Segmenter::new(&cli.segmentation_model, cli.device_id)?;
        run_background_removal(&config, &model)?;
        // Release the segmentation model's device memory before the
        // generation pipeline loads.
        drop(model);
    }

    if cli.run_generate() {
        let pipeline = GenerationPipeline::load(&cli.models_dir, cli.device_id, config.low_vram)?;
        run_generation(&config, &pipeline)?;
        drop(pipeline);
    }

    Ok(())
}
