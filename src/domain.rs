use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProcessError;

pub const RADIANCE_OUTPUT_DIR: [&str; 2] = ["Radiometria", "Texto Radiancia Promedio"];
pub const REFLECTANCE_OUTPUT_DIR: [&str; 2] = ["Radiometria", "Texto reflectancia promedio"];

pub const DEFAULT_SKY_GLINT_FACTOR: f64 = 0.00256;

/// Measurement domain. Both share the acquisition and reflectance pipeline;
/// they differ in where the instrument export lives inside a campaign folder
/// and in whether sky radiance is subtracted from the target.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Water,
    Soil,
}

impl DomainKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Water => "water",
            Self::Soil => "soil",
        }
    }

    pub fn defaults_file_name(self) -> &'static str {
        match self {
            Self::Water => "water.json",
            Self::Soil => "soil.json",
        }
    }

    /// Sub-path below a campaign folder that holds the instrument text export.
    pub fn folder_signature(self) -> [&'static str; 2] {
        match self {
            Self::Water => ["Radiometria", "Texto Rad Agua"],
            Self::Soil => ["Radiometria", "Texto Rad CorrPar"],
        }
    }

    pub fn applies_sky_correction(self) -> bool {
        matches!(self, Self::Water)
    }
}

impl fmt::Display for DomainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainKind {
    type Err = ProcessError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "water" | "agua" => Ok(Self::Water),
            "soil" | "suelo" => Ok(Self::Soil),
            _ => Err(ProcessError::UnknownDomain(value.to_string())),
        }
    }
}
