//! Reader for the spectroradiometer text export.
//!
//! A file is a free-form header, one blank line, then `wavelength radiance`
//! rows. The header is advisory: every field is extracted by its own matcher
//! and a line that fails extraction simply leaves that field absent. Data rows
//! that fail numeric conversion are dropped; only a missing separator or a
//! file with no usable row at all is an error.

use std::fs;
use std::path::Path;

use regex::{Captures, Regex};
use tracing::debug;

use crate::error::ParseError;
use crate::model::{Metadata, MetadataValue};

pub const SAVED_AT_FIELD: &str = "Spectrum saved";

const NUMBER: &str = r"[-+]?\d+(?:[.,]\d+)?(?:[eE][-+]?\d+)?";

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReading {
    pub metadata: Metadata,
    pub wavelengths: Vec<f64>,
    pub radiances: Vec<f64>,
}

impl InstrumentReading {
    pub fn saved_at(&self) -> Option<&str> {
        match self.metadata.get(SAVED_AT_FIELD) {
            Some(MetadataValue::String(value)) => Some(value.as_str()),
            _ => None,
        }
    }
}

/// How a matched header line becomes metadata fields.
#[derive(Debug, Clone, Copy)]
enum Extraction {
    Text(&'static str),
    Integer(&'static str),
    Float(&'static str),
    /// Last whitespace-separated token of the capture, as a float.
    LastTokenFloat(&'static str),
    /// Capture text with a ` nm` unit appended.
    Nanometres(&'static str),
    /// Two captures: gain then offset.
    GainOffset(&'static str, &'static str),
    /// The line's presence alone sets the field.
    Constant(&'static str, &'static str),
    Flag(&'static str),
    /// First comma-separated part of the capture, as a float.
    LeadingFloat(&'static str),
}

impl Extraction {
    fn apply(self, captures: &Captures<'_>) -> Option<Vec<(&'static str, MetadataValue)>> {
        let first = || {
            captures
                .iter()
                .skip(1)
                .flatten()
                .next()
                .map(|m| m.as_str().trim())
        };
        let field = match self {
            Self::Text(name) => {
                let value = first().filter(|value| !value.is_empty())?;
                (name, MetadataValue::String(value.to_string()))
            }
            Self::Integer(name) => (name, MetadataValue::Integer(first()?.parse().ok()?)),
            Self::Float(name) => (name, MetadataValue::Float(parse_decimal(first()?)?)),
            Self::LastTokenFloat(name) => {
                let last = first()?.split_whitespace().last()?;
                (name, MetadataValue::Float(parse_decimal(last)?))
            }
            Self::Nanometres(name) => (name, MetadataValue::String(format!("{} nm", first()?))),
            Self::GainOffset(gain_name, offset_name) => {
                let gain = parse_decimal(first()?)?;
                let offset = parse_decimal(captures.get(2)?.as_str())?;
                return Some(vec![
                    (gain_name, MetadataValue::Float(gain)),
                    (offset_name, MetadataValue::Float(offset)),
                ]);
            }
            Self::Constant(name, value) => (name, MetadataValue::String(value.to_string())),
            Self::Flag(name) => (name, MetadataValue::Bool(true)),
            Self::LeadingFloat(name) => {
                let raw = first()?.split(',').next()?;
                (name, MetadataValue::Float(parse_decimal(raw)?))
            }
        };
        Some(vec![field])
    }
}

struct HeaderMatcher {
    pattern: Regex,
    extraction: Extraction,
}

pub struct InstrumentParser {
    header: Vec<HeaderMatcher>,
    separator: Regex,
}

impl InstrumentParser {
    pub fn new() -> Result<Self, regex::Error> {
        let n = NUMBER;
        let specs = [
            (r"Program version\s*=\s*(.+)$".to_string(), Extraction::Text("Program version")),
            (r"instrument number was\s+(.+)$".to_string(), Extraction::Text("Instrument ID")),
            (r"Spectrum saved:\s*(.+)$".to_string(), Extraction::Text(SAVED_AT_FIELD)),
            (
                r"VNIR integration time\s*:\s*(\S+)".to_string(),
                Extraction::Integer("VNIR integration time"),
            ),
            (
                r"VNIR channel 1 wavelength\s*=\s*(.+)$".to_string(),
                Extraction::LastTokenFloat("Wavelength step"),
            ),
            (r"There were\s+(\d+)\s+samples".to_string(), Extraction::Integer("Samples per data")),
            (r"^xmin\s*=\s*(\S+)".to_string(), Extraction::Float("xmin")),
            (r"^xmax\s*=\s*(\S+)".to_string(), Extraction::Float("xmax")),
            (r"^ymin\s*=\s*(\S+)".to_string(), Extraction::Float("ymin")),
            (r"^ymax\s*=\s*(\S+)".to_string(), Extraction::Float("ymax")),
            (
                format!(r"SWIR1 gain was\s+({n}).*?offset was\s+({n})"),
                Extraction::GainOffset("SWIR1 gain", "SWIR1 offset"),
            ),
            (
                format!(r"SWIR2 gain was\s+({n}).*?offset was\s+({n})"),
                Extraction::GainOffset("SWIR2 gain", "SWIR2 offset"),
            ),
            (
                r"Join between VNIR and SWIR1 was\s+(\S+)".to_string(),
                Extraction::Nanometres("VNIR-SWIR1 join"),
            ),
            (
                r"Join between SWIR1 and SWIR2 was\s+(\S+)".to_string(),
                Extraction::Nanometres("SWIR1-SWIR2 join"),
            ),
            (
                r"VNIR dark signal subtracted".to_string(),
                Extraction::Flag("VNIR dark signal subtracted"),
            ),
            (
                r"(?i)(?:(\d+)\s+dark measurements taken|dark measurements taken\s+(\d+)(?:\s|$))"
                    .to_string(),
                Extraction::Integer("Dark measurements"),
            ),
            (format!(r"DCC value was\s+({n})"), Extraction::Float("DCC value")),
            (
                r"There was no foreoptic attached".to_string(),
                Extraction::Constant("Foreoptic", "None"),
            ),
            (r"GPS-Latitude is\s+(.+)$".to_string(), Extraction::Text("GPS-Latitude")),
            (r"GPS-Longitude is\s+(.+)$".to_string(), Extraction::Text("GPS-Longitude")),
            // altitude carries a comma-separated unit suffix
            (r"GPS-Altitude is\s+(.+)$".to_string(), Extraction::LeadingFloat("GPS-Altitude")),
            (r"GPS-UTC is\s+(.+)$".to_string(), Extraction::Text("GPS-UTC")),
        ];

        let mut header = Vec::with_capacity(specs.len());
        for (pattern, extraction) in specs {
            header.push(HeaderMatcher {
                pattern: Regex::new(&pattern)?,
                extraction,
            });
        }

        Ok(Self {
            header,
            separator: Regex::new(r"\n[ \t]*\n")?,
        })
    }

    pub fn parse_file(&self, path: &Path) -> Result<InstrumentReading, ParseError> {
        let bytes = fs::read(path).map_err(|source| ParseError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.parse_bytes(&bytes, &name)
    }

    pub fn parse_bytes(
        &self,
        bytes: &[u8],
        source_name: &str,
    ) -> Result<InstrumentReading, ParseError> {
        let text = decode_lossy(bytes, source_name)?;
        self.parse_text(&text, source_name)
    }

    pub fn parse_text(
        &self,
        text: &str,
        source_name: &str,
    ) -> Result<InstrumentReading, ParseError> {
        let normalized = text.replace("\r\n", "\n").replace('\r', "\n");

        let Some(boundary) = self.separator.find(&normalized) else {
            return Err(ParseError::Malformed {
                source_name: source_name.to_string(),
                reason: "no blank line between header and data".to_string(),
            });
        };
        let header = &normalized[..boundary.start()];
        let data = &normalized[boundary.end()..];

        let metadata = self.parse_header(header);
        let (wavelengths, radiances, skipped) = parse_rows(data);

        if wavelengths.is_empty() {
            return Err(ParseError::Malformed {
                source_name: source_name.to_string(),
                reason: "no valid data rows".to_string(),
            });
        }
        if skipped > 0 {
            debug!(file = %source_name, skipped, "skipped unparseable data rows");
        }

        Ok(InstrumentReading {
            metadata,
            wavelengths,
            radiances,
        })
    }

    fn parse_header(&self, header: &str) -> Metadata {
        let mut metadata = Metadata::new();
        for line in header.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let Some((matcher, captures)) = self
                .header
                .iter()
                .find_map(|matcher| matcher.pattern.captures(line).map(|c| (matcher, c)))
            else {
                continue;
            };

            if let Some(fields) = matcher.extraction.apply(&captures) {
                for (name, value) in fields {
                    metadata.insert(name.to_string(), value);
                }
            }
        }
        metadata
    }
}

/// Decodes as UTF-8, replacing invalid sequences. Only content that is
/// overwhelmingly undecodable (a binary file) is rejected.
fn decode_lossy(bytes: &[u8], source_name: &str) -> Result<String, ParseError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let text = String::from_utf8_lossy(bytes).into_owned();

    let mut meaningful = 0usize;
    let mut garbage = 0usize;
    for character in text.chars().filter(|c| !c.is_whitespace()) {
        if character == char::REPLACEMENT_CHARACTER || character == '\0' {
            garbage += 1;
        } else {
            meaningful += 1;
        }
    }
    if garbage > 0 && garbage >= meaningful {
        return Err(ParseError::Decode {
            source_name: source_name.to_string(),
        });
    }

    Ok(text)
}

fn parse_rows(data: &str) -> (Vec<f64>, Vec<f64>, usize) {
    let mut wavelengths = Vec::new();
    let mut radiances = Vec::new();
    let mut skipped = 0usize;

    for line in data.lines().map(str::trim) {
        if !line.starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        let parsed = match tokens.as_slice() {
            [wavelength, radiance] => parse_decimal(wavelength).zip(parse_decimal(radiance)),
            _ => None,
        };

        match parsed {
            Some((wavelength, radiance))
                if wavelengths.last().is_none_or(|previous| wavelength >= *previous) =>
            {
                wavelengths.push(wavelength);
                radiances.push(radiance);
            }
            _ => skipped += 1,
        }
    }

    (wavelengths, radiances, skipped)
}

/// Parses a float written with either `.` or `,` as decimal separator.
pub fn parse_decimal(token: &str) -> Option<f64> {
    let value = token.trim().replace(',', ".").parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}
