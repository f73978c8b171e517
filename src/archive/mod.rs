//! Untrusted-archive extraction and result packing.
//!
//! Extraction is fail-closed. Every entry header is validated (names, entry
//! kind, declared sizes) before the first byte is written, and bytes actually
//! inflated are counted again while writing so a header that under-reports
//! its size cannot expand past the limits. Any violation aborts the whole
//! extraction and removes whatever was written.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{ArchiveError, ArchiveSecurityError};
use crate::settings::ArchiveLimits;
use crate::util::{list_files, relative_slash_path};

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// An entry that passed header validation, ready to be written.
#[derive(Debug)]
struct PlannedEntry {
    index: usize,
    name: String,
    relative: PathBuf,
}

pub struct ArchiveGateway {
    limits: ArchiveLimits,
}

impl ArchiveGateway {
    pub fn new(limits: ArchiveLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ArchiveLimits {
        &self.limits
    }

    /// Extracts `archive_bytes` into `dest_dir`, returning the number of
    /// files written.
    pub fn extract(&self, archive_bytes: &[u8], dest_dir: &Path) -> Result<usize, ArchiveError> {
        let size = archive_bytes.len() as u64;
        if size > self.limits.max_archive_bytes {
            return Err(ArchiveSecurityError::ArchiveTooLarge {
                size,
                limit: self.limits.max_archive_bytes,
            }
            .into());
        }

        let mut archive = ZipArchive::new(Cursor::new(archive_bytes))?;
        if archive.len() > self.limits.max_entries {
            return Err(ArchiveSecurityError::TooManyEntries {
                count: archive.len(),
                limit: self.limits.max_entries,
            }
            .into());
        }

        let plan = self.plan(&mut archive)?;

        let base = fs::canonicalize(dest_dir).map_err(|source| ArchiveError::Io {
            path: dest_dir.to_path_buf(),
            source,
        })?;

        let mut written = Vec::with_capacity(plan.len());
        match self.write_entries(&mut archive, &plan, &base, &mut written) {
            Ok(()) => {
                info!(files = written.len(), dest = %base.display(), "archive extracted");
                Ok(written.len())
            }
            Err(err) => {
                warn!(error = %err, removed = written.len(), "aborting extraction");
                for path in written.iter().rev() {
                    let _ = fs::remove_file(path);
                }
                Err(err)
            }
        }
    }

    fn plan(
        &self,
        archive: &mut ZipArchive<Cursor<&[u8]>>,
    ) -> Result<Vec<PlannedEntry>, ArchiveError> {
        let mut plan = Vec::new();
        let mut declared_total = 0u64;

        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index)?;
            let name = entry.name().to_string();

            if name.ends_with('/') || name.ends_with('\\') {
                continue;
            }

            let relative = normalize_entry_name(&name)?;

            let basename_len = relative
                .file_name()
                .map(|value| value.to_string_lossy().chars().count())
                .unwrap_or(0);
            if basename_len > self.limits.max_name_len {
                return Err(ArchiveSecurityError::NameTooLong {
                    name,
                    len: basename_len,
                    limit: self.limits.max_name_len,
                }
                .into());
            }

            if entry
                .unix_mode()
                .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
            {
                return Err(ArchiveSecurityError::Symlink { name }.into());
            }

            let declared = entry.size();
            if declared > self.limits.max_entry_bytes {
                return Err(ArchiveSecurityError::EntryTooLarge {
                    name,
                    size: declared,
                    limit: self.limits.max_entry_bytes,
                }
                .into());
            }
            declared_total = declared_total.saturating_add(declared);
            if declared_total > self.limits.max_total_bytes {
                return Err(ArchiveSecurityError::TotalTooLarge {
                    total: declared_total,
                    limit: self.limits.max_total_bytes,
                }
                .into());
            }

            plan.push(PlannedEntry {
                index,
                name,
                relative,
            });
        }

        Ok(plan)
    }

    fn write_entries(
        &self,
        archive: &mut ZipArchive<Cursor<&[u8]>>,
        plan: &[PlannedEntry],
        base: &Path,
        written: &mut Vec<PathBuf>,
    ) -> Result<(), ArchiveError> {
        let mut total = 0u64;

        for planned in plan {
            let dest = safe_join(base, &planned.relative, &planned.name)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|source| ArchiveError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
                // a directory created earlier may resolve somewhere else
                let resolved = fs::canonicalize(parent).map_err(|source| ArchiveError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
                if !resolved.starts_with(base) {
                    return Err(ArchiveSecurityError::UnsafeDestination {
                        name: planned.name.clone(),
                    }
                    .into());
                }
            }

            let entry = archive.by_index(planned.index)?;
            let mut file = File::create(&dest).map_err(|source| ArchiveError::Io {
                path: dest.clone(),
                source,
            })?;
            written.push(dest.clone());

            let remaining_total = self.limits.max_total_bytes.saturating_sub(total);
            let cap = self.limits.max_entry_bytes.min(remaining_total);
            let copied = copy_capped(entry, &mut file, cap).map_err(|source| ArchiveError::Io {
                path: dest.clone(),
                source,
            })?;

            if copied > self.limits.max_entry_bytes {
                return Err(ArchiveSecurityError::EntryTooLarge {
                    name: planned.name.clone(),
                    size: copied,
                    limit: self.limits.max_entry_bytes,
                }
                .into());
            }
            total = total.saturating_add(copied);
            if total > self.limits.max_total_bytes {
                return Err(ArchiveSecurityError::TotalTooLarge {
                    total,
                    limit: self.limits.max_total_bytes,
                }
                .into());
            }
            debug!(entry = %planned.name, bytes = copied, "extracted entry");
        }

        Ok(())
    }

    /// Packs every regular file under `src_dir` (entry names relative to it,
    /// `/`-separated) followed by the `extra` named blobs.
    pub fn pack(
        &self,
        src_dir: &Path,
        extra: &[(String, Vec<u8>)],
    ) -> Result<Vec<u8>, ArchiveError> {
        let files = list_files(src_dir).map_err(|source| ArchiveError::Io {
            path: src_dir.to_path_buf(),
            source,
        })?;

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

        for path in &files {
            let Some(name) = relative_slash_path(path, src_dir) else {
                continue;
            };
            let data = fs::read(path).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
            writer.start_file(name, options)?;
            writer.write_all(&data).map_err(|source| ArchiveError::Io {
                path: path.clone(),
                source,
            })?;
        }

        for (name, data) in extra {
            writer.start_file(name.as_str(), options)?;
            writer.write_all(data).map_err(|source| ArchiveError::Io {
                path: PathBuf::from(name),
                source,
            })?;
        }

        let cursor = writer.finish()?;
        debug!(files = files.len(), extra = extra.len(), "archive packed");
        Ok(cursor.into_inner())
    }
}

/// Turns an entry name into a relative path, refusing absolute names and
/// any `..` segment.
fn normalize_entry_name(name: &str) -> Result<PathBuf, ArchiveSecurityError> {
    let is_drive_path = name.len() >= 2
        && name.as_bytes()[0].is_ascii_alphabetic()
        && name.as_bytes()[1] == b':';
    if name.starts_with('/') || name.starts_with('\\') || is_drive_path {
        return Err(ArchiveSecurityError::AbsolutePath {
            name: name.to_string(),
        });
    }

    let mut relative = PathBuf::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(ArchiveSecurityError::PathTraversal {
                    name: name.to_string(),
                });
            }
            other => relative.push(other),
        }
    }

    if relative.as_os_str().is_empty() {
        return Err(ArchiveSecurityError::UnsafeDestination {
            name: name.to_string(),
        });
    }
    Ok(relative)
}

/// Joins `relative` onto `base` and re-checks that the result stays inside.
pub fn safe_join(
    base: &Path,
    relative: &Path,
    name: &str,
) -> Result<PathBuf, ArchiveSecurityError> {
    let mut dest = base.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ArchiveSecurityError::UnsafeDestination {
                    name: name.to_string(),
                });
            }
        }
    }
    if dest == base || !dest.starts_with(base) {
        return Err(ArchiveSecurityError::UnsafeDestination {
            name: name.to_string(),
        });
    }
    Ok(dest)
}

/// Copies at most `cap + 1` bytes so an oversized stream is detected without
/// being fully inflated.
fn copy_capped<R: Read, W: Write>(reader: R, writer: &mut W, cap: u64) -> io::Result<u64> {
    let mut limited = reader.take(cap.saturating_add(1));
    io::copy(&mut limited, writer)
}

#[cfg(test)]
mod tests;
