//! One processing request from upload bytes to result archive.
//!
//! Every request runs in its own ephemeral directory pair (`in/`, `out/`)
//! under the configured temp root; the pair is removed when the request
//! finishes, whichever way it finishes. The processor itself holds only
//! read-only state, so one instance may serve concurrent requests.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::Value;
use tempfile::TempDir;
use tracing::{info, warn};

use crate::archive::ArchiveGateway;
use crate::calibration::DEFAULT_CALIBRATION_FILE;
use crate::config::{
    CALIBRATION_FILE_KEY, CALIBRATION_PARAMS_KEY, ConfigMap, RunConfig, merge_shallow,
    parse_overrides,
};
use crate::domain::DomainKind;
use crate::error::{ProcessError, RunError};
use crate::model::{CalibrationProvenance, ResultMetadata, RunInputs, RunResult};
use crate::parser::InstrumentParser;
use crate::runner;
use crate::settings::Settings;
use crate::util::{
    ensure_directory, list_files, now_local_string, relative_slash_path, sha256_bytes,
    stays_inside,
};

pub const METADATA_ENTRY: &str = "metadata.json";

/// Where an uploaded calibration curve is staged inside the input tree.
pub const STAGED_CALIBRATION_DIR: [&str; 2] = ["configs", "Spectralon"];

/// A calibration curve supplied with the request, used for that run only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationUpload {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
}

/// Everything about a request except the measurement data itself.
#[derive(Debug, Clone, Default)]
pub struct ProcessRequest {
    pub kind: String,
    pub params: ConfigMap,
    pub calibration: Option<CalibrationUpload>,
    pub calibration_params: ConfigMap,
}

impl ProcessRequest {
    /// Builds a request from raw JSON override documents as received at the
    /// boundary. Blank documents mean no overrides.
    pub fn from_json(
        kind: &str,
        params_json: &str,
        calibration_params_json: &str,
    ) -> Result<Self, ProcessError> {
        Ok(Self {
            kind: kind.to_string(),
            params: parse_overrides(params_json)?,
            calibration: None,
            calibration_params: parse_overrides(calibration_params_json)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub archive: Vec<u8>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone)]
struct DomainDefaults {
    water: ConfigMap,
    soil: ConfigMap,
}

impl DomainDefaults {
    fn load(config_dir: &Path) -> Result<Self, ProcessError> {
        Ok(Self {
            water: load_defaults(config_dir, DomainKind::Water)?,
            soil: load_defaults(config_dir, DomainKind::Soil)?,
        })
    }

    fn get(&self, kind: DomainKind) -> &ConfigMap {
        match kind {
            DomainKind::Water => &self.water,
            DomainKind::Soil => &self.soil,
        }
    }
}

fn load_defaults(config_dir: &Path, kind: DomainKind) -> Result<ConfigMap, ProcessError> {
    let path = config_dir.join(kind.defaults_file_name());
    let raw = fs::read_to_string(&path).map_err(|source| ProcessError::Io {
        path: path.clone(),
        source,
    })?;
    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ProcessError::InvalidConfig(format!(
            "{} must hold a JSON object",
            path.display()
        ))),
        Err(err) => Err(ProcessError::InvalidConfig(format!(
            "{} is not valid JSON: {err}",
            path.display()
        ))),
    }
}

#[derive(Clone, Copy)]
struct TimeoutBudget {
    started: Instant,
    timeout_ms: u64,
}

impl TimeoutBudget {
    fn new(timeout_ms: u64) -> Option<Self> {
        if timeout_ms == 0 {
            return None;
        }
        Some(Self {
            started: Instant::now(),
            timeout_ms,
        })
    }

    fn elapsed_ms(self) -> u64 {
        u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn enforce(self, stage: &'static str) -> Result<(), ProcessError> {
        let elapsed_ms = self.elapsed_ms();
        if elapsed_ms <= self.timeout_ms {
            return Ok(());
        }
        Err(ProcessError::TimeoutExceeded {
            stage,
            elapsed_ms,
            budget_ms: self.timeout_ms,
        })
    }
}

fn enforce_timeout(budget: Option<TimeoutBudget>, stage: &'static str) -> Result<(), ProcessError> {
    if let Some(budget) = budget {
        budget.enforce(stage)?;
    }
    Ok(())
}

/// The `in/` and `out/` trees of one request; both vanish on drop.
struct Workspace {
    _root: TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl Workspace {
    fn create(parent: &Path) -> Result<Self, ProcessError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| ProcessError::Io { path, source }
        };
        ensure_directory(parent).map_err(io_err(parent))?;
        let root = tempfile::Builder::new()
            .prefix("radproc-")
            .tempdir_in(parent)
            .map_err(io_err(parent))?;
        let input = root.path().join("in");
        let output = root.path().join("out");
        fs::create_dir_all(&input).map_err(io_err(&input))?;
        fs::create_dir_all(&output).map_err(io_err(&output))?;
        Ok(Self {
            _root: root,
            input,
            output,
        })
    }
}

/// How the input tree of a request is populated.
enum Source<'a> {
    Archive { bytes: &'a [u8], name: &'a str },
    Folder(&'a Path),
}

pub struct Processor {
    settings: Settings,
    gateway: ArchiveGateway,
    defaults: DomainDefaults,
    parser: InstrumentParser,
}

impl Processor {
    /// Reads both domain default documents and compiles the header matchers
    /// once; all of it stays immutable and is shared by every request.
    pub fn new(settings: &Settings) -> Result<Self, ProcessError> {
        let defaults = DomainDefaults::load(&settings.config_dir)?;
        let parser = InstrumentParser::new().map_err(RunError::from)?;
        info!(config_dir = %settings.config_dir.display(), "domain defaults loaded");
        Ok(Self {
            settings: settings.clone(),
            gateway: ArchiveGateway::new(settings.limits),
            defaults,
            parser,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validates and extracts `archive`, runs the requested domain and
    /// returns the packed results plus `metadata.json`.
    pub fn process(
        &self,
        archive: &[u8],
        archive_name: &str,
        request: &ProcessRequest,
    ) -> Result<ProcessOutput, ProcessError> {
        self.execute(
            Source::Archive {
                bytes: archive,
                name: archive_name,
            },
            request,
        )
    }

    /// Same as [`Processor::process`] for a directory that is already
    /// extracted; it is copied into the ephemeral input tree first.
    pub fn process_folder(
        &self,
        input_dir: &Path,
        request: &ProcessRequest,
    ) -> Result<ProcessOutput, ProcessError> {
        if !input_dir.is_dir() {
            return Err(ProcessError::InvalidConfig(format!(
                "input folder does not exist: {}",
                input_dir.display()
            )));
        }
        self.execute(Source::Folder(input_dir), request)
    }

    fn execute(
        &self,
        source: Source<'_>,
        request: &ProcessRequest,
    ) -> Result<ProcessOutput, ProcessError> {
        let budget = TimeoutBudget::new(self.settings.timeout_ms);
        let kind: DomainKind = request.kind.parse()?;
        let mut params = merge_shallow(self.defaults.get(kind), &request.params);

        let workspace = Workspace::create(&self.settings.tmp_dir)?;
        let (input_name, input_bytes) = match source {
            Source::Archive { bytes, name } => {
                let files = self.gateway.extract(bytes, &workspace.input)?;
                info!(kind = %kind, archive = name, files, "input archive extracted");
                (name.to_string(), bytes.len() as u64)
            }
            Source::Folder(dir) => {
                let copied = copy_tree(dir, &workspace.input)?;
                let name = dir
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| dir.display().to_string());
                info!(kind = %kind, folder = %dir.display(), bytes = copied, "input folder copied");
                (name, copied)
            }
        };
        enforce_timeout(budget, "extract")?;

        confine_calibration_path(&mut params, &workspace.input)?;
        let staged = match &request.calibration {
            Some(upload) if !upload.bytes.is_empty() => {
                Some(stage_calibration(upload, &workspace.input, &mut params)?)
            }
            _ => None,
        };
        merge_calibration_params(&mut params, &request.calibration_params);

        let config = RunConfig::from_map(&params)?;
        confine_folder_list(&config)?;
        let result = runner::run(
            kind,
            &self.parser,
            &workspace.input,
            &workspace.output,
            &config,
            &self.settings.default_calibration_path(),
        )?;
        enforce_timeout(budget, "run")?;

        let produced = produced_manifest(&result, &workspace.output)?;
        let spectralon = provenance(
            &result,
            staged.as_ref(),
            request.calibration.as_ref(),
            &workspace.input,
        );
        render_calibration_path(&mut params, &workspace.input);

        let metadata = ResultMetadata {
            produced,
            campaigns: result.campaigns.clone(),
            kind,
            run_id: now_local_string(),
            processor_version: format!("radproc-{}", env!("CARGO_PKG_VERSION")),
            params_effective: params,
            inputs: RunInputs {
                zip_name: input_name,
                zip_size_bytes: input_bytes,
                spectralon,
            },
            notes: format!("{kind} processing in an ephemeral workspace"),
            warnings: result.warnings.clone(),
            skipped_cycles: result.skipped_cycles.clone(),
        };

        let document = serde_json::to_vec_pretty(&metadata).map_err(|err| {
            ProcessError::InvalidConfig(format!("metadata not serializable: {err}"))
        })?;
        let archive = self
            .gateway
            .pack(&workspace.output, &[(METADATA_ENTRY.to_string(), document)])?;
        enforce_timeout(budget, "pack")?;

        info!(
            kind = %kind,
            produced = metadata.produced.len(),
            skipped = metadata.skipped_cycles.len(),
            bytes = archive.len(),
            "request processed"
        );
        Ok(ProcessOutput { archive, metadata })
    }
}

/// Copies regular files of `src` below `dest`, returning the bytes copied.
fn copy_tree(src: &Path, dest: &Path) -> Result<u64, ProcessError> {
    let files = list_files(src).map_err(|source| ProcessError::Io {
        path: src.to_path_buf(),
        source,
    })?;
    let mut total = 0u64;
    for file in files {
        let Ok(relative) = file.strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        if let Some(parent) = target.parent() {
            ensure_directory(parent).map_err(|source| ProcessError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        total += fs::copy(&file, &target).map_err(|source| ProcessError::Io {
            path: file.clone(),
            source,
        })?;
    }
    Ok(total)
}

/// A caller-named calibration file is read from the input tree only.
fn confine_calibration_path(params: &mut ConfigMap, input_dir: &Path) -> Result<(), ProcessError> {
    let Some(value) = params.get(CALIBRATION_FILE_KEY) else {
        return Ok(());
    };
    let Some(raw) = value.as_str() else {
        if value.is_null() {
            params.remove(CALIBRATION_FILE_KEY);
            return Ok(());
        }
        return Err(ProcessError::InvalidConfig(format!(
            "{CALIBRATION_FILE_KEY} must be a path string"
        )));
    };

    let relative = Path::new(raw);
    if raw.trim().is_empty() || !stays_inside(relative) {
        return Err(ProcessError::InvalidConfig(format!(
            "{CALIBRATION_FILE_KEY} must be a relative path inside the input archive: {raw}"
        )));
    }
    let resolved = input_dir.join(relative);
    params.insert(
        CALIBRATION_FILE_KEY.to_string(),
        Value::String(resolved.to_string_lossy().into_owned()),
    );
    Ok(())
}

fn stage_calibration(
    upload: &CalibrationUpload,
    input_dir: &Path,
    params: &mut ConfigMap,
) -> Result<PathBuf, ProcessError> {
    let dir = STAGED_CALIBRATION_DIR
        .iter()
        .fold(input_dir.to_path_buf(), |dir, part| dir.join(part));
    ensure_directory(&dir).map_err(|source| ProcessError::Io {
        path: dir.clone(),
        source,
    })?;
    let path = dir.join(DEFAULT_CALIBRATION_FILE);
    fs::write(&path, &upload.bytes).map_err(|source| ProcessError::Io {
        path: path.clone(),
        source,
    })?;
    params.insert(
        CALIBRATION_FILE_KEY.to_string(),
        Value::String(path.to_string_lossy().into_owned()),
    );
    info!(
        name = upload.name.as_deref().unwrap_or(DEFAULT_CALIBRATION_FILE),
        bytes = upload.bytes.len(),
        "uploaded calibration staged"
    );
    Ok(path)
}

/// Listed campaign folders are resolved inside the input tree only.
fn confine_folder_list(config: &RunConfig) -> Result<(), ProcessError> {
    match config
        .folder_list
        .iter()
        .find(|folder| !stays_inside(Path::new(folder.as_str())))
    {
        Some(folder) => Err(ProcessError::InvalidConfig(format!(
            "folder_list entries must be relative paths inside the input archive: {folder}"
        ))),
        None => Ok(()),
    }
}

/// Caller calibration options are merged key by key into the run's map.
fn merge_calibration_params(params: &mut ConfigMap, overrides: &ConfigMap) {
    if overrides.is_empty() {
        return;
    }
    let entry = params
        .entry(CALIBRATION_PARAMS_KEY.to_string())
        .or_insert_with(|| Value::Object(ConfigMap::new()));
    if !entry.is_object() {
        *entry = Value::Object(ConfigMap::new());
    }
    if let Value::Object(existing) = entry {
        existing.extend(overrides.clone());
    }
}

/// Paths inside the input tree are reported relative to it.
fn render_calibration_path(params: &mut ConfigMap, input_dir: &Path) {
    let relative = params
        .get(CALIBRATION_FILE_KEY)
        .and_then(Value::as_str)
        .and_then(|raw| relative_slash_path(Path::new(raw), input_dir));
    if let Some(relative) = relative {
        params.insert(CALIBRATION_FILE_KEY.to_string(), Value::String(relative));
    }
}

fn produced_manifest(result: &RunResult, output_dir: &Path) -> Result<Vec<String>, ProcessError> {
    let mut produced: Vec<String> = result
        .produced
        .iter()
        .filter_map(|path| relative_slash_path(path, output_dir))
        .collect();
    if produced.is_empty() {
        produced = list_files(output_dir)
            .map_err(|source| ProcessError::Io {
                path: output_dir.to_path_buf(),
                source,
            })?
            .iter()
            .filter_map(|path| relative_slash_path(path, output_dir))
            .collect();
        if !produced.is_empty() {
            warn!(files = produced.len(), "run reported no artifacts, listing output tree instead");
        }
    }
    Ok(produced)
}

fn provenance(
    result: &RunResult,
    staged: Option<&PathBuf>,
    upload: Option<&CalibrationUpload>,
    input_dir: &Path,
) -> CalibrationProvenance {
    let file_name = |path: &Path| {
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    match (staged, upload) {
        (Some(staged), Some(upload)) if *staged == result.calibration_path => {
            CalibrationProvenance {
                source: "uploaded".to_string(),
                name: upload
                    .name
                    .clone()
                    .unwrap_or_else(|| DEFAULT_CALIBRATION_FILE.to_string()),
                sha256: sha256_bytes(&upload.bytes),
            }
        }
        _ if result.calibration_path.starts_with(input_dir) => CalibrationProvenance {
            source: "archive".to_string(),
            name: file_name(&result.calibration_path),
            sha256: result.calibration_sha256.clone(),
        },
        _ => CalibrationProvenance {
            source: "default".to_string(),
            name: file_name(&result.calibration_path),
            sha256: result.calibration_sha256.clone(),
        },
    }
}
