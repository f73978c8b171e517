use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use radproc::settings::{ArchiveLimits, Settings};

#[derive(Parser, Debug)]
#[command(
    name = "radproc",
    version,
    about = "Spectroradiometer reflectance processing for water and soil campaigns"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a zip archive of instrument exports into a result archive.
    Process(ProcessArgs),
    /// Process an already extracted directory into a result archive.
    ProcessFolder(ProcessFolderArgs),
    /// Parse one instrument file and print its metadata as JSON.
    Inspect(InspectArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ProcessArgs {
    /// Input zip archive.
    pub input: PathBuf,

    /// Result archive path; defaults to `<input stem>_results.zip` next to the input.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub request: RequestArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args, Debug, Clone)]
pub struct ProcessFolderArgs {
    /// Directory holding the campaign folders.
    pub input: PathBuf,

    /// Result archive path; defaults to `<input dir>_results.zip` next to the input.
    #[arg(long)]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub request: RequestArgs,

    #[command(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Measurement domain: water (agua) or soil (suelo).
    #[arg(long)]
    pub kind: String,

    /// JSON object of configuration overrides.
    #[arg(long, conflicts_with = "params_file")]
    pub params: Option<String>,

    /// File holding the JSON object of configuration overrides.
    #[arg(long)]
    pub params_file: Option<PathBuf>,

    /// Calibration curve used for this run only.
    #[arg(long)]
    pub calibration: Option<PathBuf>,

    /// JSON object merged into `calibration_params`.
    #[arg(long)]
    pub calibration_params: Option<String>,

    /// Also write the run metadata document here.
    #[arg(long)]
    pub metadata_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct SettingsArgs {
    #[arg(long, env = "MAX_ZIP_MB", default_value_t = 200)]
    pub max_zip_mb: u64,

    #[arg(long, env = "MAX_ZIP_FILES", default_value_t = 20_000)]
    pub max_zip_files: usize,

    #[arg(long, env = "MAX_ZIP_NAME_LEN", default_value_t = 255)]
    pub max_zip_name_len: usize,

    #[arg(long, env = "MAX_SINGLE_MB", default_value_t = 512)]
    pub max_single_mb: u64,

    #[arg(long, env = "MAX_TOTAL_MB", default_value_t = 2048)]
    pub max_total_mb: u64,

    /// Parent of the per-run working directories; defaults to the system temp dir.
    #[arg(long, env = "TMP_DIR")]
    pub tmp_dir: Option<PathBuf>,

    #[arg(long, env = "RADPROC_CONFIG_DIR", default_value = "configs")]
    pub config_dir: PathBuf,

    /// Deadline for one run in milliseconds; 0 disables it.
    #[arg(long, env = "RADPROC_TIMEOUT_MS", default_value_t = 0)]
    pub timeout_ms: u64,
}

impl SettingsArgs {
    pub fn to_settings(&self) -> Settings {
        Settings {
            limits: ArchiveLimits::from_megabytes(
                self.max_zip_mb,
                self.max_zip_files,
                self.max_zip_name_len,
                self.max_single_mb,
                self.max_total_mb,
            ),
            tmp_dir: self.tmp_dir.clone().unwrap_or_else(std::env::temp_dir),
            config_dir: self.config_dir.clone(),
            timeout_ms: self.timeout_ms,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Instrument text file.
    pub file: PathBuf,

    /// Write the JSON report here instead of stdout.
    #[arg(long)]
    pub output: Option<PathBuf>,
}
