//! Process-wide tunables, built once at start-up and passed by reference.

use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Bounds applied to an untrusted upload before anything is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveLimits {
    pub max_archive_bytes: u64,
    pub max_entries: usize,
    pub max_name_len: usize,
    pub max_entry_bytes: u64,
    pub max_total_bytes: u64,
}

impl ArchiveLimits {
    pub fn from_megabytes(
        archive_mb: u64,
        max_entries: usize,
        max_name_len: usize,
        entry_mb: u64,
        total_mb: u64,
    ) -> Self {
        Self {
            max_archive_bytes: archive_mb.saturating_mul(MIB),
            max_entries,
            max_name_len,
            max_entry_bytes: entry_mb.saturating_mul(MIB),
            max_total_bytes: total_mb.saturating_mul(MIB),
        }
    }
}

impl Default for ArchiveLimits {
    fn default() -> Self {
        Self::from_megabytes(200, 20_000, 255, 512, 2048)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub limits: ArchiveLimits,
    /// Parent of the per-run ephemeral directories.
    pub tmp_dir: PathBuf,
    /// Holds `water.json`, `soil.json` and `calibration/`.
    pub config_dir: PathBuf,
    /// Wall-clock budget for one `process` call; 0 disables it.
    pub timeout_ms: u64,
}

impl Settings {
    pub fn default_calibration_path(&self) -> PathBuf {
        self.config_dir
            .join("calibration")
            .join(crate::calibration::DEFAULT_CALIBRATION_FILE)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            limits: ArchiveLimits::default(),
            tmp_dir: std::env::temp_dir(),
            config_dir: PathBuf::from("configs"),
            timeout_ms: 0,
        }
    }
}
