use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use radproc::orchestrator::{CalibrationUpload, ProcessOutput, ProcessRequest, Processor};
use radproc::util::write_json_pretty;

use crate::cli::{ProcessArgs, ProcessFolderArgs, RequestArgs};

pub fn run(args: ProcessArgs) -> Result<()> {
    let settings = args.settings.to_settings();
    let request = build_request(&args.request)?;
    let processor = Processor::new(&settings).context("failed to load domain defaults")?;

    let archive = fs::read(&args.input)
        .with_context(|| format!("failed to read {}", args.input.display()))?;
    let archive_name = file_name(&args.input);
    info!(
        input = %args.input.display(),
        bytes = archive.len(),
        kind = %request.kind,
        "processing archive"
    );

    let output = processor
        .process(&archive, &archive_name, &request)
        .with_context(|| format!("failed to process {}", args.input.display()))?;

    let output_path = args
        .output
        .unwrap_or_else(|| sibling_with_suffix(&args.input, "_results.zip"));
    finish(&output, &output_path, args.request.metadata_path.as_deref())
}

pub fn run_folder(args: ProcessFolderArgs) -> Result<()> {
    let settings = args.settings.to_settings();
    let request = build_request(&args.request)?;
    let processor = Processor::new(&settings).context("failed to load domain defaults")?;

    info!(input = %args.input.display(), kind = %request.kind, "processing folder");
    let output = processor
        .process_folder(&args.input, &request)
        .with_context(|| format!("failed to process {}", args.input.display()))?;

    let output_path = args
        .output
        .unwrap_or_else(|| sibling_with_suffix(&args.input, "_results.zip"));
    finish(&output, &output_path, args.request.metadata_path.as_deref())
}

fn build_request(args: &RequestArgs) -> Result<ProcessRequest> {
    let params_json = match (&args.params, &args.params_file) {
        (Some(raw), _) => raw.clone(),
        (None, Some(path)) => fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => String::new(),
    };
    let calibration_params_json = args.calibration_params.clone().unwrap_or_default();

    let mut request = ProcessRequest::from_json(&args.kind, &params_json, &calibration_params_json)
        .context("invalid configuration overrides")?;

    if let Some(path) = &args.calibration {
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        request.calibration = Some(CalibrationUpload {
            name: Some(file_name(path)),
            bytes,
        });
    }
    Ok(request)
}

fn finish(output: &ProcessOutput, output_path: &Path, metadata_path: Option<&Path>) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output_path, &output.archive)
        .with_context(|| format!("failed to write {}", output_path.display()))?;

    if let Some(metadata_path) = metadata_path {
        write_json_pretty(metadata_path, &output.metadata)
            .with_context(|| format!("failed to write {}", metadata_path.display()))?;
        info!(path = %metadata_path.display(), "wrote run metadata");
    }

    let metadata = &output.metadata;
    for warning in &metadata.warnings {
        warn!(warning = %warning, "run warning");
    }
    for skipped in &metadata.skipped_cycles {
        warn!(
            campaign = %skipped.campaign,
            cycle = skipped.cycle,
            reason = %skipped.reason,
            "cycle skipped"
        );
    }
    info!(
        path = %output_path.display(),
        produced = metadata.produced.len(),
        campaigns = metadata.campaigns.len(),
        skipped = metadata.skipped_cycles.len(),
        "wrote result archive"
    );
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn sibling_with_suffix(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "radproc".to_string());
    input.with_file_name(format!("{stem}{suffix}"))
}
