//! Column statistics, reflectance and first-order error propagation.

use serde::Serialize;

use crate::error::EngineError;

/// Lower bound for the panel mean in every division.
///
/// This is a numerical-safety clamp against zero or near-zero panel signal,
/// not a physical quantity: a dark panel yields a huge but finite
/// reflectance instead of `inf`/`NaN`.
pub const PANEL_FLOOR: f64 = 1e-12;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorModel {
    /// Propagate target noise only.
    Target,
    /// Propagate target and panel noise, treated as independent.
    Both,
    /// No error estimate requested.
    None,
}

impl ErrorModel {
    pub fn from_config(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("target") | Some("mues") => Self::Target,
            Some("both") => Self::Both,
            _ => Self::None,
        }
    }
}

/// Per-cycle curves, all aligned to the calibration wavelength grid.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReflectanceResult {
    pub radiance_mean: Vec<f64>,
    pub radiance_std: Vec<f64>,
    pub panel_radiance_mean: Vec<f64>,
    pub panel_radiance_std: Vec<f64>,
    pub reflectance: Vec<f64>,
    pub reflectance_error: Vec<f64>,
}

/// Column-wise mean and population standard deviation.
pub fn column_stats(
    rows: &[Vec<f64>],
    width: usize,
    what: &'static str,
) -> Result<(Vec<f64>, Vec<f64>), EngineError> {
    if rows.is_empty() {
        return Err(EngineError::EmptyMatrix(what));
    }
    if let Some(row) = rows.iter().find(|row| row.len() != width) {
        return Err(EngineError::ShapeMismatch {
            what,
            expected: width,
            found: row.len(),
        });
    }

    let count = rows.len() as f64;
    let mut mean = vec![0.0; width];
    for row in rows {
        for (acc, value) in mean.iter_mut().zip(row) {
            *acc += value;
        }
    }
    mean.iter_mut().for_each(|value| *value /= count);

    let mut std = vec![0.0; width];
    for row in rows {
        for ((acc, value), mu) in std.iter_mut().zip(row).zip(&mean) {
            *acc += (value - mu).powi(2);
        }
    }
    std.iter_mut().for_each(|value| *value = (*value / count).sqrt());

    Ok((mean, std))
}

pub fn compute(
    panel: &[Vec<f64>],
    target: &[Vec<f64>],
    calibration: &[f64],
    error_model: ErrorModel,
) -> Result<ReflectanceResult, EngineError> {
    reflect(panel, target, None, calibration, error_model)
}

/// Like [`compute`], with `glint` (already scaled, one value per column)
/// removed from the target mean inside the reflectance numerator only. The
/// reported target radiance and its spread stay as measured.
pub fn compute_with_glint(
    panel: &[Vec<f64>],
    target: &[Vec<f64>],
    glint: &[f64],
    calibration: &[f64],
    error_model: ErrorModel,
) -> Result<ReflectanceResult, EngineError> {
    if glint.len() != calibration.len() {
        return Err(EngineError::ShapeMismatch {
            what: "sky",
            expected: calibration.len(),
            found: glint.len(),
        });
    }
    reflect(panel, target, Some(glint), calibration, error_model)
}

/// Sky-reflected share of the water-leaving signal: `factor * sky_mean`.
pub fn sky_glint(sky: &[Vec<f64>], width: usize, factor: f64) -> Result<Vec<f64>, EngineError> {
    let (sky_mean, _) = column_stats(sky, width, "sky")?;
    Ok(sky_mean.into_iter().map(|value| factor * value).collect())
}

fn reflect(
    panel: &[Vec<f64>],
    target: &[Vec<f64>],
    glint: Option<&[f64]>,
    calibration: &[f64],
    error_model: ErrorModel,
) -> Result<ReflectanceResult, EngineError> {
    let width = calibration.len();
    let (panel_mean, panel_std) = column_stats(panel, width, "panel")?;
    let (target_mean, target_std) = column_stats(target, width, "target")?;

    let mut reflectance = Vec::with_capacity(width);
    let mut reflectance_error = Vec::with_capacity(width);

    for column in 0..width {
        let p = panel_mean[column].max(PANEL_FLOOR);
        let t = target_mean[column] - glint.map_or(0.0, |glint| glint[column]);
        reflectance.push(calibration[column] * t / p);

        let target_term = (1.0 / p).powi(2) * target_std[column].powi(2);
        let error = match error_model {
            ErrorModel::Target => target_term.sqrt(),
            ErrorModel::Both => {
                let panel_term = (-t / p.powi(2)).powi(2) * panel_std[column].powi(2);
                (target_term + panel_term).sqrt()
            }
            ErrorModel::None => 0.0,
        };
        reflectance_error.push(error);
    }

    Ok(ReflectanceResult {
        radiance_mean: target_mean,
        radiance_std: target_std,
        panel_radiance_mean: panel_mean,
        panel_radiance_std: panel_std,
        reflectance,
        reflectance_error,
    })
}
