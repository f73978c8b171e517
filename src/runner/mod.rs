//! Per-domain measurement run: discover batches, split them into cycles,
//! compute each cycle and persist its artifacts.
//!
//! A cycle that fails (unreadable file, wrong channel count, write error) is
//! recorded in the result and skipped; only problems that make every cycle
//! meaningless (bad pattern, missing calibration) end the run.

mod cycle;
mod discovery;
mod output;
mod plot;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::calibration::CalibrationCurve;
use crate::config::RunConfig;
use crate::domain::DomainKind;
use crate::engine::{self, ReflectanceResult};
use crate::error::{CycleError, RunError};
use crate::indexer::{CycleIndex, build_index};
use crate::model::{RunResult, SkippedCycle};
use crate::parser::InstrumentParser;
use crate::util::write_json_pretty;

pub use cycle::{
    END_TIME_FIELD, PANEL_FILES_FIELD, SKY_FILES_FIELD, START_TIME_FIELD, TARGET_FILES_FIELD,
};
pub use discovery::{Batch, BatchFinder};
pub use output::{CycleArtifacts, cycle_tag, format_scientific, sanitize_component};

/// Runs one domain over `input_dir`, writing only below `output_dir`.
pub fn run(
    kind: DomainKind,
    parser: &InstrumentParser,
    input_dir: &Path,
    output_dir: &Path,
    config: &RunConfig,
    default_calibration: &Path,
) -> Result<RunResult, RunError> {
    let calibration = resolve_calibration(config, default_calibration)?;
    let index = build_index(config.spectrum, &config.meas_order)?;
    let finder = BatchFinder::new(kind)?;

    fs::create_dir_all(output_dir).map_err(|source| RunError::Io {
        path: output_dir.to_path_buf(),
        source,
    })?;

    let mut result = RunResult {
        calibration_path: calibration.path.clone(),
        calibration_sha256: calibration.sha256.clone(),
        ..RunResult::default()
    };

    let batches = finder.discover(input_dir, &config.folder_list)?;
    if batches.is_empty() {
        let missing = RunError::NoBatchesFound {
            root: input_dir.to_path_buf(),
        };
        warn!(kind = %kind, "{missing}");
        result.warnings.push(missing.to_string());
        return Ok(result);
    }

    let runner = CycleRunner {
        kind,
        config,
        index: &index,
        calibration: &calibration,
        parser,
        output_dir,
    };

    for batch in &batches {
        if !result.campaigns.contains(&batch.campaign) {
            result.campaigns.push(batch.campaign.clone());
        }
        runner.run_batch(&finder, batch, &mut result)?;
    }

    info!(
        kind = %kind,
        campaigns = result.campaigns.len(),
        produced = result.produced.len(),
        skipped = result.skipped_cycles.len(),
        "run finished"
    );
    Ok(result)
}

/// The per-run override wins when it exists; otherwise the bundled curve.
fn resolve_calibration(
    config: &RunConfig,
    default_calibration: &Path,
) -> Result<CalibrationCurve, RunError> {
    let path = match &config.calibration_file {
        Some(candidate) if candidate.is_file() => candidate.clone(),
        Some(candidate) => {
            warn!(
                path = %candidate.display(),
                fallback = %default_calibration.display(),
                "calibration override not found, using default"
            );
            default_calibration.to_path_buf()
        }
        None => default_calibration.to_path_buf(),
    };
    let curve = CalibrationCurve::load(&path, &config.calibration_params)?;
    info!(path = %path.display(), samples = curve.values.len(), "calibration loaded");
    Ok(curve)
}

struct CycleRunner<'a> {
    kind: DomainKind,
    config: &'a RunConfig,
    index: &'a CycleIndex,
    calibration: &'a CalibrationCurve,
    parser: &'a InstrumentParser,
    output_dir: &'a Path,
}

impl CycleRunner<'_> {
    fn run_batch(
        &self,
        finder: &BatchFinder,
        batch: &Batch,
        result: &mut RunResult,
    ) -> Result<(), RunError> {
        let files = finder.data_files(&batch.dir)?;
        let cycle_len = self.index.cycle_len;
        let cycles = files.len() / cycle_len;
        let remainder = files.len() % cycle_len;

        if files.is_empty() {
            warn!(
                campaign = %batch.campaign,
                dir = %batch.dir.display(),
                "batch has no data files"
            );
            result
                .warnings
                .push(format!("{}: no data files in {}", batch.campaign, batch.dir.display()));
            return Ok(());
        }
        if remainder > 0 {
            warn!(
                campaign = %batch.campaign,
                dropped = remainder,
                cycle_len,
                "trailing files do not fill a cycle"
            );
            result.warnings.push(format!(
                "{}: {remainder} trailing file(s) do not fill a cycle of {cycle_len} and were dropped",
                batch.campaign
            ));
        }
        info!(campaign = %batch.campaign, files = files.len(), cycles, "processing batch");

        for (cycle, chunk) in files.chunks_exact(cycle_len).enumerate() {
            match self.run_cycle(&batch.campaign, cycle, chunk) {
                Ok(produced) => result.produced.extend(produced),
                Err(err) => {
                    warn!(campaign = %batch.campaign, cycle, error = %err, "skipping cycle");
                    result.skipped_cycles.push(SkippedCycle {
                        campaign: batch.campaign.clone(),
                        cycle,
                        reason: error_chain(&err),
                    });
                }
            }
        }
        Ok(())
    }

    fn run_cycle(
        &self,
        campaign: &str,
        cycle: usize,
        files: &[PathBuf],
    ) -> Result<Vec<PathBuf>, CycleError> {
        let width = self.calibration.values.len();
        let with_sky = self.kind.applies_sky_correction() && !self.index.sky_offsets.is_empty();
        let data = cycle::load_cycle(self.parser, files, self.index, width, with_sky)?;

        let calibration = &self.calibration.values;
        let error_model = self.config.error_model();
        let reflectance = if with_sky {
            let glint = engine::sky_glint(&data.sky, width, self.config.sky_glint_factor)?;
            engine::compute_with_glint(&data.panel, &data.target, &glint, calibration, error_model)?
        } else {
            engine::compute(&data.panel, &data.target, calibration, error_model)?
        };

        let tag = cycle_tag(cycle, &self.config.target_list);
        let artifacts = CycleArtifacts::new(self.output_dir, campaign, &tag);
        let produced = self.persist(&artifacts, &data, &reflectance)?;
        info!(campaign, cycle, tag = artifacts.tag(), files = produced.len(), "cycle written");
        Ok(produced)
    }

    fn persist(
        &self,
        artifacts: &CycleArtifacts,
        data: &cycle::CycleData,
        result: &ReflectanceResult,
    ) -> Result<Vec<PathBuf>, CycleError> {
        for dir in artifacts.directories() {
            fs::create_dir_all(dir).map_err(|source| CycleError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut produced = Vec::new();
        let series = [
            (artifacts.radiance(), &result.radiance_mean),
            (artifacts.radiance_error(), &result.radiance_std),
            (artifacts.reflectance(), &result.reflectance),
            (artifacts.reflectance_error(), &result.reflectance_error),
        ];
        for (path, values) in series {
            output::write_series(&path, values).map_err(|source| CycleError::Io {
                path: path.clone(),
                source,
            })?;
            produced.push(path);
        }

        let metadata_path = artifacts.metadata();
        write_json_pretty(&metadata_path, &data.metadata).map_err(|source| CycleError::Io {
            path: metadata_path.clone(),
            source,
        })?;
        produced.push(metadata_path);

        let wavelengths = self.calibration.wavelengths();
        let plot_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| CycleError::Plot { path, source }
        };
        if self.config.rad_plot {
            let path = artifacts.radiance_plot();
            plot::band_chart(&path, &wavelengths, &result.radiance_mean, &result.radiance_std)
                .map_err(plot_err(&path))?;
            produced.push(path);
        }
        if self.config.ref_plot {
            let path = artifacts.reflectance_plot();
            plot::band_chart(&path, &wavelengths, &result.reflectance, &result.reflectance_error)
                .map_err(plot_err(&path))?;
            produced.push(path);
        }
        if self.config.rad_all_plot {
            let path = artifacts.radiance_all_plot();
            plot::overview_chart(&path, &wavelengths, &data.target, &data.panel)
                .map_err(plot_err(&path))?;
            produced.push(path);
        }

        Ok(produced)
    }
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests;
