//! Maps an acquisition pattern onto file offsets within one measurement cycle.

use serde::Serialize;

use crate::error::PatternError;

/// Upper bound on files per cycle. Offsets are materialised per cycle, so
/// `repeats` from a request must not be able to size an allocation freely.
pub const MAX_CYCLE_LEN: usize = 100_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Panel,
    Target,
    Sky,
    Ignored,
}

impl Step {
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "panel" | "spectralon" => Self::Panel,
            "target" | "mues" => Self::Target,
            "sky" | "cielo" => Self::Sky,
            _ => Self::Ignored,
        }
    }
}

/// Which step supplies a cycle boundary timestamp.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampSource {
    Panel,
    Target,
    Unknown,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CycleIndex {
    pub panel_offsets: Vec<usize>,
    pub target_offsets: Vec<usize>,
    /// Offsets of sky steps; they belong to neither panel nor target.
    pub sky_offsets: Vec<usize>,
    pub start_source: TimestampSource,
    pub end_source: TimestampSource,
    pub cycle_len: usize,
}

pub fn build_index<S: AsRef<str>>(repeats: i64, pattern: &[S]) -> Result<CycleIndex, PatternError> {
    if pattern.is_empty() {
        return Err(PatternError::InvalidPattern(
            "measurement order is empty".to_string(),
        ));
    }
    if repeats <= 0 {
        return Err(PatternError::InvalidPattern(format!(
            "repeats per step must be positive, got {repeats}"
        )));
    }
    let repeats = usize::try_from(repeats)
        .map_err(|_| PatternError::InvalidPattern(format!("repeats out of range: {repeats}")))?;
    let cycle_len = repeats
        .checked_mul(pattern.len())
        .filter(|len| *len <= MAX_CYCLE_LEN)
        .ok_or_else(|| {
            PatternError::InvalidPattern(format!(
                "{repeats} repeats of {} steps exceed {MAX_CYCLE_LEN} files per cycle",
                pattern.len()
            ))
        })?;

    let mut panel_offsets = Vec::new();
    let mut target_offsets = Vec::new();
    let mut sky_offsets = Vec::new();
    let mut start_source = TimestampSource::Unknown;
    let mut end_source = TimestampSource::Unknown;
    let last = pattern.len() - 1;
    let mut n = 0usize;

    for (position, label) in pattern.iter().enumerate() {
        let step = Step::from_label(label.as_ref());
        let source = match step {
            Step::Panel => {
                panel_offsets.extend(n..n + repeats);
                Some(TimestampSource::Panel)
            }
            Step::Target => {
                target_offsets.extend(n..n + repeats);
                Some(TimestampSource::Target)
            }
            Step::Sky => {
                sky_offsets.extend(n..n + repeats);
                None
            }
            Step::Ignored => None,
        };

        if let Some(source) = source {
            if position == 0 {
                start_source = source;
            }
            if position == last {
                end_source = source;
            }
        }
        n += repeats;
    }

    if panel_offsets.is_empty() || target_offsets.is_empty() {
        return Err(PatternError::InvalidPattern(
            "measurement order needs at least one panel and one target step".to_string(),
        ));
    }

    Ok(CycleIndex {
        panel_offsets,
        target_offsets,
        sky_offsets,
        start_source,
        end_source,
        cycle_len,
    })
}
