use std::fs;

use anyhow::{Context, Result};
use tracing::info;

use radproc::model::InspectReport;
use radproc::parser::InstrumentParser;
use radproc::util::{sha256_bytes, write_json_pretty};

use crate::cli::InspectArgs;

pub fn run(args: InspectArgs) -> Result<()> {
    let parser = InstrumentParser::new().context("failed to compile header matchers")?;
    let bytes =
        fs::read(&args.file).with_context(|| format!("failed to read {}", args.file.display()))?;
    let source = args.file.display().to_string();
    let reading = parser
        .parse_bytes(&bytes, &source)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let report = InspectReport {
        source,
        sha256: sha256_bytes(&bytes),
        rows: reading.wavelengths.len(),
        first_wavelength: reading.wavelengths.first().copied(),
        last_wavelength: reading.wavelengths.last().copied(),
        metadata: reading.metadata,
    };

    info!(
        file = %args.file.display(),
        rows = report.rows,
        fields = report.metadata.len(),
        "parsed instrument file"
    );

    match args.output {
        Some(path) => {
            write_json_pretty(&path, &report)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "wrote inspect report");
        }
        None => {
            let rendered = serde_json::to_string_pretty(&report)
                .context("failed to serialize inspect report")?;
            println!("{rendered}");
        }
    }
    Ok(())
}
