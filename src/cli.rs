use clap::Parser;
use std::path::PathBuf;

/// Batch image-to-3D pipeline: background removal plus mesh generation.
#[derive(Parser, Debug)]
#[command(
    name = "img2mesh",
    version,
    about = "Batch driver turning images into textured 3D meshes",
    after_help = "\
Examples:
  img2mesh                    run both stages (inputs/ -> processed/ -> output/)
  img2mesh --background       only remove backgrounds
  img2mesh --generate         only generate meshes from processed images
  img2mesh -r 512             lower-VRAM resolution
  img2mesh -r 1024            medium quality resolution"
)]
pub struct Cli {
    /// Only run background removal (inputs/ -> processed/)
    #[arg(short, long)]
    pub background: bool,

    /// Only run 3D generation (processed/ -> output/)
    #[arg(short, long)]
    pub generate: bool,

    /// Resolution override (512 or 1024); invalid values fall back to the
    /// default mode
    #[arg(short, long, value_name = "VALUE")]
    pub resolution: Option<String>,

    /// Background-removal model path
    #[arg(long, default_value = "models/birefnet.onnx", value_name = "PATH")]
    pub segmentation_model: PathBuf,

    /// Directory holding the generation pipeline models
    #[arg(long, default_value = "models", value_name = "PATH")]
    pub models_dir: PathBuf,

    /// GPU device id
    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    /// Verbose logging (repeatable: -v, -vv)
    #[arg(short, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// No stage flag selects both stages; an explicit flag narrows the run
    /// to that stage, and passing both flags runs both.
    pub const fn run_background(&self) -> bool {
        self.background || !self.generate
    }

    pub const fn run_generate(&self) -> bool {
        self.generate || !self.background
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["img2mesh"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn no_flags_runs_both_stages() {
        let cli = parse(&[]);
        assert!(cli.run_background());
        assert!(cli.run_generate());
    }

    #[test]
    fn background_flag_narrows_to_stage_one() {
        let cli = parse(&["--background"]);
        assert!(cli.run_background());
        assert!(!cli.run_generate());
    }

    #[test]
    fn generate_flag_narrows_to_stage_two() {
        let cli = parse(&["-g"]);
        assert!(!cli.run_background());
        assert!(cli.run_generate());
    }

    #[test]
    fn both_flags_run_both_stages() {
        let cli = parse(&["-b", "-g"]);
        assert!(cli.run_background());
        assert!(cli.run_generate());
    }

    #[test]
    fn resolution_is_passed_through_raw() {
        let cli = parse(&["-r", "2048"]);
        assert_eq!(cli.resolution.as_deref(), Some("2048"));
    }
}
