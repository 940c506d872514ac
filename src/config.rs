use std::fmt;
use std::path::PathBuf;

/// Quality/resolution mode of the generation pipeline.
///
/// The cascade modes condition on a larger image and refine geometry in a
/// second pass inside the exported graphs; they are reachable only as
/// defaults since the CLI selector accepts the plain 512/1024 modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    R512,
    R1024,
    Cascade1024,
    Cascade1536,
}

impl Resolution {
    /// Side length of the square conditioning image fed to the pipeline.
    pub const fn image_size(self) -> u32 {
        match self {
            Self::R512 => 512,
            Self::R1024 | Self::Cascade1024 => 1024,
            Self::Cascade1536 => 1536,
        }
    }

    pub const fn is_cascade(self) -> bool {
        matches!(self, Self::Cascade1024 | Self::Cascade1536)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::Cascade1024
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::R512 => "512",
            Self::R1024 => "1024",
            Self::Cascade1024 => "1024_cascade",
            Self::Cascade1536 => "1536_cascade",
        };
        f.write_str(name)
    }
}

/// Parse a user-supplied resolution override.
///
/// Accepts exactly `512` and `1024` and returns the mode together with a
/// VRAM hint for the startup log. Anything else (other integers, non-numeric
/// input) is rejected with a descriptive message; the caller keeps its
/// default instead of failing the run.
pub fn parse_resolution(input: &str) -> std::result::Result<(Resolution, &'static str), String> {
    let trimmed = input.trim();
    match trimmed.parse::<i64>() {
        Ok(512) => Ok((Resolution::R512, "~8-10GB VRAM")),
        Ok(1024) => Ok((Resolution::R1024, "~12-14GB VRAM")),
        Ok(other) => Err(format!(
            "invalid resolution '{other}', valid options: 512, 1024"
        )),
        Err(_) => Err(format!(
            "could not parse resolution '{trimmed}', valid options: 512, 1024"
        )),
    }
}

/// Settings threaded through both stages.
///
/// The directory layout is fixed relative to the working directory; the
/// resolution override from the CLI lands here rather than in process-wide
/// state.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub output_dir: PathBuf,
    pub resolution: Resolution,
    /// Baked texture resolution handed to the exporter.
    pub texture_size: u32,
    /// Face budget for the exporter's decimation pass.
    pub decimation_target: usize,
    /// The pipeline's built-in preprocessing stays off because background
    /// removal runs as its own stage.
    pub preprocess: bool,
    /// Keep only actively-used model memory resident on the device.
    pub low_vram: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("inputs"),
            processed_dir: PathBuf::from("processed"),
            output_dir: PathBuf::from("output"),
            resolution: Resolution::default(),
            texture_size: 2048,
            decimation_target: 1_000_000,
            preprocess: false,
            low_vram: true,
        }
    }
}
