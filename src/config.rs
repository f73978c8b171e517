//! Per-run configuration: domain defaults shallow-merged with caller
//! overrides, then typed.

use std::path::PathBuf;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::calibration::CalibrationParams;
use crate::domain::DEFAULT_SKY_GLINT_FACTOR;
use crate::engine::ErrorModel;
use crate::error::{ProcessError, RunError};

pub const CALIBRATION_FILE_KEY: &str = "calibration_file";
pub const CALIBRATION_PARAMS_KEY: &str = "calibration_params";

const LEGACY_KEYS: [(&str, &str); 2] = [
    ("spectralon_file", CALIBRATION_FILE_KEY),
    ("spectralon_params", CALIBRATION_PARAMS_KEY),
];

pub type ConfigMap = Map<String, Value>;

/// Parses a caller-supplied JSON object. Empty input and non-object JSON
/// both mean "no overrides".
pub fn parse_overrides(raw: &str) -> Result<ConfigMap, ProcessError> {
    if raw.trim().is_empty() {
        return Ok(ConfigMap::new());
    }
    let value: Value = serde_json::from_str(raw).map_err(ProcessError::InvalidOverrides)?;
    Ok(match value {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    })
}

/// Renames legacy keys to their current names; an existing current key wins.
pub fn normalize_keys(mut map: ConfigMap) -> ConfigMap {
    for (legacy, current) in LEGACY_KEYS {
        if let Some(value) = map.remove(legacy) {
            map.entry(current.to_string()).or_insert(value);
        }
    }
    map
}

/// Shallow merge: every top-level key of `overrides` replaces the default.
pub fn merge_shallow(defaults: &ConfigMap, overrides: &ConfigMap) -> ConfigMap {
    let mut merged = normalize_keys(defaults.clone());
    merged.extend(normalize_keys(overrides.clone()));
    merged
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_repeats")]
    pub spectrum: i64,
    #[serde(default)]
    pub meas_order: Vec<String>,
    #[serde(default)]
    pub target_list: Vec<String>,
    #[serde(default)]
    pub folder_list: Vec<String>,
    #[serde(default)]
    pub ref_error_method: Option<String>,
    #[serde(default = "enabled", deserialize_with = "flag")]
    pub rad_plot: bool,
    #[serde(default = "enabled", deserialize_with = "flag")]
    pub ref_plot: bool,
    #[serde(default, deserialize_with = "flag")]
    pub rad_all_plot: bool,
    #[serde(default)]
    pub calibration_file: Option<PathBuf>,
    #[serde(default)]
    pub calibration_params: CalibrationParams,
    #[serde(default = "default_sky_glint_factor")]
    pub sky_glint_factor: f64,
}

impl RunConfig {
    pub fn from_map(map: &ConfigMap) -> Result<Self, RunError> {
        serde_json::from_value(Value::Object(normalize_keys(map.clone())))
            .map_err(|err| RunError::InvalidConfig(err.to_string()))
    }

    pub fn error_model(&self) -> ErrorModel {
        ErrorModel::from_config(self.ref_error_method.as_deref())
    }
}

fn default_repeats() -> i64 {
    10
}

fn enabled() -> bool {
    true
}

fn default_sky_glint_factor() -> f64 {
    DEFAULT_SKY_GLINT_FACTOR
}

/// Accepts `0`/`1`, booleans and their string spellings.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Bool(value) => Ok(value),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|value| value != 0.0)),
        Value::String(text) => Ok(matches!(
            text.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )),
        Value::Null => Ok(false),
        other => Err(de::Error::custom(format!("expected a 0/1 flag, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("test value must be an object"),
        }
    }

    #[test]
    fn overrides_win_per_key_without_deep_merge() {
        let defaults = object(json!({
            "spectrum": 10,
            "meas_order": ["panel", "target"],
            "calibration_params": {"header_lines": 1, "reflectance_scale": 1.0}
        }));
        let overrides = object(json!({
            "spectrum": 3,
            "calibration_params": {"reflectance_scale": 0.01}
        }));

        let merged = merge_shallow(&defaults, &overrides);
        assert_eq!(merged["spectrum"], 3);
        assert_eq!(merged["meas_order"], json!(["panel", "target"]));
        assert_eq!(merged["calibration_params"], json!({"reflectance_scale": 0.01}));
    }

    #[test]
    fn legacy_keys_are_renamed_before_merge() {
        let defaults = object(json!({"spectralon_file": "a.txt"}));
        let overrides = object(json!({"spectralon_file": "b.txt"}));
        let merged = merge_shallow(&defaults, &overrides);
        assert_eq!(merged[CALIBRATION_FILE_KEY], "b.txt");
        assert!(!merged.contains_key("spectralon_file"));
    }

    #[test]
    fn typed_config_applies_defaults_and_flags() {
        let map = object(json!({
            "spectrum": 2,
            "meas_order": ["panel", "target"],
            "rad_plot": 0,
            "ref_plot": "1",
            "ref_error_method": "both"
        }));
        let config = RunConfig::from_map(&map).expect("config");
        assert_eq!(config.spectrum, 2);
        assert!(!config.rad_plot);
        assert!(config.ref_plot);
        assert!(!config.rad_all_plot);
        assert_eq!(config.error_model(), ErrorModel::Both);
        assert_eq!(config.calibration_params, CalibrationParams::default());
        assert!((config.sky_glint_factor - DEFAULT_SKY_GLINT_FACTOR).abs() < f64::EPSILON);
    }

    #[test]
    fn wrong_types_are_invalid_config() {
        let map = object(json!({"meas_order": "panel"}));
        assert!(matches!(
            RunConfig::from_map(&map),
            Err(RunError::InvalidConfig(_))
        ));
    }

    #[test]
    fn parse_overrides_accepts_empty_and_rejects_garbage() {
        assert!(parse_overrides("  ").expect("empty").is_empty());
        assert!(parse_overrides("[1, 2]").expect("array").is_empty());
        assert_eq!(parse_overrides(r#"{"spectrum": 4}"#).expect("object")["spectrum"], 4);
        assert!(matches!(
            parse_overrides("{not json"),
            Err(ProcessError::InvalidOverrides(_))
        ));
    }
}
