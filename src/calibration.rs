//! Reference-panel calibration curve.
//!
//! The file is one header line followed by `wavelength reflectance` rows.
//! Only rows whose integer wavelength lies in the supported range are kept,
//! in file order.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;
use crate::parser::parse_decimal;
use crate::util::sha256_bytes;

pub const MIN_WAVELENGTH_NM: i64 = 350;
pub const MAX_WAVELENGTH_NM: i64 = 2500;
pub const DEFAULT_CALIBRATION_FILE: &str = "SRT-99-120.txt";

/// Caller-tunable reading options for the calibration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub header_lines: usize,
    /// Multiplier applied to every value, e.g. 0.01 for a curve in percent.
    pub reflectance_scale: f64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            header_lines: 1,
            reflectance_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationCurve {
    pub values: Vec<f64>,
    pub path: PathBuf,
    pub sha256: String,
}

impl CalibrationCurve {
    pub fn load(path: &Path, params: &CalibrationParams) -> Result<Self, CalibrationError> {
        if !path.is_file() {
            return Err(CalibrationError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let bytes = fs::read(path).map_err(|source| CalibrationError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let text = String::from_utf8_lossy(&bytes);
        let values = parse_curve(&text, params);
        if values.is_empty() {
            return Err(CalibrationError::Empty {
                path: path.to_path_buf(),
            });
        }

        Ok(Self {
            values,
            path: path.to_path_buf(),
            sha256: sha256_bytes(&bytes),
        })
    }

    /// Wavelength in nm of each curve sample, assuming 1 nm spacing from the
    /// start of the supported range.
    pub fn wavelengths(&self) -> Vec<f64> {
        (0..self.values.len())
            .map(|offset| (MIN_WAVELENGTH_NM as usize + offset) as f64)
            .collect()
    }
}

fn parse_curve(text: &str, params: &CalibrationParams) -> Vec<f64> {
    text.lines()
        .skip(params.header_lines)
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let wavelength = parse_decimal(tokens.next()?)?.trunc() as i64;
            let value = parse_decimal(tokens.next()?)?;
            (MIN_WAVELENGTH_NM..=MAX_WAVELENGTH_NM)
                .contains(&wavelength)
                .then_some(value * params.reflectance_scale)
        })
        .collect()
}
