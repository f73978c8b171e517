//! Typed errors for each stage of a processing run.
//!
//! Each stage has its own enum so callers can tell a rejected upload
//! (`ArchiveError`, `ProcessError::UnknownDomain`) apart from a structural
//! failure of the run (`RunError`) or a recoverable per-cycle problem
//! (`CycleError`). The binary wraps all of them in `anyhow`.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed instrument file {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },

    #[error("instrument file {source_name} is not decodable as text")]
    Decode { source_name: String },

    #[error("failed to read instrument file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatternError {
    #[error("invalid acquisition pattern: {0}")]
    InvalidPattern(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("{what} has {found} columns but the calibration curve has {expected}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{0} matrix has no rows")]
    EmptyMatrix(&'static str),
}

#[derive(Error, Debug)]
pub enum CalibrationError {
    #[error("calibration file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read calibration file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("calibration file {} has no rows in the supported wavelength range", path.display())]
    Empty { path: PathBuf },
}

/// Reasons an uploaded archive is refused. Every variant aborts the whole
/// extraction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArchiveSecurityError {
    #[error("archive is too large: {size} bytes (limit {limit} bytes)")]
    ArchiveTooLarge { size: u64, limit: u64 },

    #[error("archive has too many entries: {count} (limit {limit})")]
    TooManyEntries { count: usize, limit: usize },

    #[error("absolute path not allowed in archive: {name}")]
    AbsolutePath { name: String },

    #[error("parent-directory segment not allowed in archive: {name}")]
    PathTraversal { name: String },

    #[error("file name too long in archive: {name} ({len} > {limit})")]
    NameTooLong {
        name: String,
        len: usize,
        limit: usize,
    },

    #[error("symbolic link not allowed in archive: {name}")]
    Symlink { name: String },

    #[error("entry exceeds uncompressed size limit: {name} ({size} bytes, limit {limit})")]
    EntryTooLarge { name: String, size: u64, limit: u64 },

    #[error("total uncompressed size exceeds limit ({total} bytes, limit {limit})")]
    TotalTooLarge { total: u64, limit: u64 },

    #[error("entry resolves outside the destination directory: {name}")]
    UnsafeDestination { name: String },
}

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error(transparent)]
    Security(#[from] ArchiveSecurityError),

    #[error("archive is corrupt or unreadable")]
    Corrupt(#[from] zip::result::ZipError),

    #[error("archive i/o failed at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Structural failures of one domain run.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("invalid run configuration: {0}")]
    InvalidConfig(String),

    #[error("no measurement batches found under {}", root.display())]
    NoBatchesFound { root: PathBuf },

    #[error("failed to compile file matchers")]
    Matchers(#[from] regex::Error),

    #[error("run i/o failed at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures confined to one measurement cycle; the cycle is skipped.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render plot {}", path.display())]
    Plot {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("unknown measurement domain '{0}' (expected 'water' or 'soil')")]
    UnknownDomain(String),

    #[error("configuration overrides are not valid JSON")]
    InvalidOverrides(#[source] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("processing deadline exceeded during {stage} (elapsed {elapsed_ms} ms > budget {budget_ms} ms)")]
    TimeoutExceeded {
        stage: &'static str,
        elapsed_ms: u64,
        budget_ms: u64,
    },

    #[error("processing i/o failed at {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProcessError {
    /// The request itself was unacceptable (bad selector, overrides or
    /// archive) as opposed to the run failing on acceptable input.
    pub fn is_rejection(&self) -> bool {
        match self {
            Self::UnknownDomain(_) | Self::InvalidOverrides(_) | Self::InvalidConfig(_) => true,
            Self::Archive(ArchiveError::Security(_) | ArchiveError::Corrupt(_)) => true,
            Self::Run(RunError::Pattern(_) | RunError::InvalidConfig(_)) => true,
            Self::Archive(ArchiveError::Io { .. })
            | Self::Run(_)
            | Self::TimeoutExceeded { .. }
            | Self::Io { .. } => false,
        }
    }
}
