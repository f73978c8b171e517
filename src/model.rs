use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::DomainKind;

/// One scalar field of instrument metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<String>),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCycle {
    pub campaign: String,
    pub cycle: usize,
    pub reason: String,
}

/// What one domain run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunResult {
    pub produced: Vec<PathBuf>,
    pub campaigns: Vec<String>,
    pub calibration_path: PathBuf,
    pub calibration_sha256: String,
    pub skipped_cycles: Vec<SkippedCycle>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProvenance {
    pub source: String,
    pub name: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInputs {
    pub zip_name: String,
    pub zip_size_bytes: u64,
    pub spectralon: CalibrationProvenance,
}

/// The `metadata.json` document injected into every output archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub produced: Vec<String>,
    pub campaigns: Vec<String>,
    pub kind: DomainKind,
    pub run_id: String,
    pub processor_version: String,
    pub params_effective: Map<String, Value>,
    pub inputs: RunInputs,
    pub notes: String,
    pub warnings: Vec<String>,
    pub skipped_cycles: Vec<SkippedCycle>,
}

/// Summary of a single instrument file, as printed by `radproc inspect`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InspectReport {
    pub source: String,
    pub sha256: String,
    pub rows: usize,
    pub first_wavelength: Option<f64>,
    pub last_wavelength: Option<f64>,
    pub metadata: Metadata,
}
