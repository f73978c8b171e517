//! Loading one measurement cycle into radiance matrices.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::CycleError;
use crate::indexer::{CycleIndex, TimestampSource};
use crate::model::{Metadata, MetadataValue};
use crate::parser::{InstrumentParser, InstrumentReading};

pub const START_TIME_FIELD: &str = "Start time";
pub const END_TIME_FIELD: &str = "End time";
pub const TARGET_FILES_FIELD: &str = "Target files";
pub const PANEL_FILES_FIELD: &str = "Panel files";
pub const SKY_FILES_FIELD: &str = "Sky files";

const UNKNOWN_TIME: &str = "unknown";

/// Radiance rows of one cycle, each cut to the calibration width.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleData {
    pub panel: Vec<Vec<f64>>,
    pub target: Vec<Vec<f64>>,
    pub sky: Vec<Vec<f64>>,
    pub metadata: Metadata,
}

struct Step {
    names: Vec<String>,
    readings: Vec<InstrumentReading>,
}

impl Step {
    fn load(
        parser: &InstrumentParser,
        files: &[PathBuf],
        offsets: &[usize],
    ) -> Result<Self, CycleError> {
        let mut names = Vec::with_capacity(offsets.len());
        let mut readings = Vec::with_capacity(offsets.len());
        for path in offsets.iter().filter_map(|offset| files.get(*offset)) {
            names.push(file_name(path));
            readings.push(parser.parse_file(path)?);
        }
        Ok(Self { names, readings })
    }

    fn rows(&self, width: usize) -> Vec<Vec<f64>> {
        self.readings
            .iter()
            .map(|reading| reading.radiances.iter().take(width).copied().collect())
            .collect()
    }
}

/// Parses the panel, target and (when `with_sky`) sky files of one cycle.
///
/// Metadata comes from the file that closes the cycle, plus the cycle
/// boundary times and the contributing file names. A boundary file without a
/// save time yields `unknown` for that bound.
pub fn load_cycle(
    parser: &InstrumentParser,
    files: &[PathBuf],
    index: &CycleIndex,
    width: usize,
    with_sky: bool,
) -> Result<CycleData, CycleError> {
    let panel = Step::load(parser, files, &index.panel_offsets)?;
    let target = Step::load(parser, files, &index.target_offsets)?;
    let sky = if with_sky {
        Step::load(parser, files, &index.sky_offsets)?
    } else {
        Step {
            names: Vec::new(),
            readings: Vec::new(),
        }
    };

    let start = boundary(&panel, &target, index.start_source, Bound::First);
    let end = boundary(&panel, &target, index.end_source, Bound::Last);

    let closing = match index.end_source {
        TimestampSource::Panel => panel.readings.last(),
        TimestampSource::Target | TimestampSource::Unknown => target.readings.last(),
    };
    let mut metadata = closing.map(|reading| reading.metadata.clone()).unwrap_or_default();
    metadata.insert(
        START_TIME_FIELD.to_string(),
        MetadataValue::String(start.unwrap_or(UNKNOWN_TIME).to_string()),
    );
    metadata.insert(
        END_TIME_FIELD.to_string(),
        MetadataValue::String(end.unwrap_or(UNKNOWN_TIME).to_string()),
    );
    metadata.insert(
        TARGET_FILES_FIELD.to_string(),
        MetadataValue::List(target.names.clone()),
    );
    metadata.insert(
        PANEL_FILES_FIELD.to_string(),
        MetadataValue::List(panel.names.clone()),
    );
    if with_sky {
        metadata.insert(SKY_FILES_FIELD.to_string(), MetadataValue::List(sky.names.clone()));
    }

    debug!(
        panel = panel.readings.len(),
        target = target.readings.len(),
        sky = sky.readings.len(),
        "cycle loaded"
    );

    Ok(CycleData {
        panel: panel.rows(width),
        target: target.rows(width),
        sky: sky.rows(width),
        metadata,
    })
}

#[derive(Clone, Copy)]
enum Bound {
    First,
    Last,
}

fn boundary<'a>(
    panel: &'a Step,
    target: &'a Step,
    source: TimestampSource,
    bound: Bound,
) -> Option<&'a str> {
    let step = match source {
        TimestampSource::Panel => panel,
        TimestampSource::Target => target,
        TimestampSource::Unknown => return None,
    };
    let reading = match bound {
        Bound::First => step.readings.first(),
        Bound::Last => step.readings.last(),
    };
    reading.and_then(InstrumentReading::saved_at)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
