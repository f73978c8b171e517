//! Artifact naming and the numeric text format.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::domain::{RADIANCE_OUTPUT_DIR, REFLECTANCE_OUTPUT_DIR};

/// Where one cycle's artifacts go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleArtifacts {
    radiance_dir: PathBuf,
    reflectance_dir: PathBuf,
    tag: String,
}

impl CycleArtifacts {
    pub fn new(output_dir: &Path, campaign: &str, tag: &str) -> Self {
        let campaign_dir = output_dir.join(sanitize_component(campaign, "campaign"));
        Self {
            radiance_dir: RADIANCE_OUTPUT_DIR
                .iter()
                .fold(campaign_dir.clone(), |dir, part| dir.join(part)),
            reflectance_dir: REFLECTANCE_OUTPUT_DIR
                .iter()
                .fold(campaign_dir, |dir, part| dir.join(part)),
            tag: sanitize_component(tag, "MED"),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn directories(&self) -> [&Path; 2] {
        [&self.radiance_dir, &self.reflectance_dir]
    }

    pub fn radiance(&self) -> PathBuf {
        self.radiance_dir.join(format!("{}_rad.txt", self.tag))
    }

    pub fn radiance_error(&self) -> PathBuf {
        self.radiance_dir.join(format!("{}_rad-error.txt", self.tag))
    }

    pub fn radiance_plot(&self) -> PathBuf {
        self.radiance_dir.join(format!("{}_rad.png", self.tag))
    }

    pub fn radiance_all_plot(&self) -> PathBuf {
        self.radiance_dir.join(format!("{}_rad_all.png", self.tag))
    }

    pub fn reflectance(&self) -> PathBuf {
        self.reflectance_dir.join(format!("{}_ref.txt", self.tag))
    }

    pub fn reflectance_error(&self) -> PathBuf {
        self.reflectance_dir.join(format!("{}_ref-error.txt", self.tag))
    }

    pub fn reflectance_plot(&self) -> PathBuf {
        self.reflectance_dir.join(format!("{}_ref.png", self.tag))
    }

    pub fn metadata(&self) -> PathBuf {
        self.reflectance_dir.join(format!("{}_metadata.json", self.tag))
    }
}

/// Caller label for the cycle if one is given, else `MED_001`, `MED_002`...
pub fn cycle_tag(cycle: usize, target_list: &[String]) -> String {
    target_list
        .get(cycle)
        .map(|label| label.trim())
        .filter(|label| !label.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("MED_{:03}", cycle + 1))
}

/// Reduces a caller-supplied name to one safe path component.
pub fn sanitize_component(name: &str, fallback: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => fallback.to_string(),
        _ => cleaned,
    }
}

/// `%.18e` in C notation: signed exponent of at least two digits.
pub fn format_scientific(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let formatted = format!("{value:.18e}");
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return formatted;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.abs())
}

/// One value per line.
pub fn write_series(path: &Path, values: &[f64]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for value in values {
        writeln!(writer, "{}", format_scientific(*value))?;
    }
    writer.flush()
}
