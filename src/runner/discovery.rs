//! Finds campaign batches and orders the files inside them.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::domain::DomainKind;
use crate::error::RunError;
use crate::util::stays_inside;

use super::output::sanitize_component;

/// One directory of instrument text files belonging to a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Already reduced to a single path component.
    pub campaign: String,
    pub dir: PathBuf,
}

impl Batch {
    fn new(campaign: &str, dir: PathBuf) -> Self {
        Self {
            campaign: sanitize_component(campaign, "campaign"),
            dir,
        }
    }
}

pub struct BatchFinder {
    kind: DomainKind,
    sequence: Regex,
}

impl BatchFinder {
    pub fn new(kind: DomainKind) -> Result<Self, RunError> {
        Ok(Self {
            kind,
            sequence: Regex::new(r"(?i)(\d+)\.(?:asd|txt)")?,
        })
    }

    /// With an explicit folder list each name is resolved to its expected
    /// sub-path; if none of those exist the listed folders are searched
    /// instead. Without a list the whole input tree is searched.
    pub fn discover(
        &self,
        input_dir: &Path,
        folder_list: &[String],
    ) -> Result<Vec<Batch>, RunError> {
        if folder_list.is_empty() {
            let mut found = Vec::new();
            self.search(input_dir, &mut found)?;
            return Ok(found
                .into_iter()
                .map(|dir| Batch::new(&campaign_of(&dir), dir))
                .collect());
        }
        if let Some(folder) = folder_list
            .iter()
            .find(|folder| !stays_inside(Path::new(folder.as_str())))
        {
            return Err(RunError::InvalidConfig(format!(
                "folder_list entry leaves the input tree: {folder}"
            )));
        }

        let [parent, leaf] = self.kind.folder_signature();
        let direct: Vec<Batch> = folder_list
            .iter()
            .filter_map(|folder| {
                let dir = input_dir.join(folder).join(parent).join(leaf);
                dir.is_dir().then(|| Batch::new(folder, dir))
            })
            .collect();
        if !direct.is_empty() {
            return Ok(direct);
        }

        warn!(
            folders = folder_list.len(),
            "listed folders lack the expected layout, searching them recursively"
        );
        let mut batches = Vec::new();
        for folder in folder_list {
            let base = input_dir.join(folder);
            if !base.is_dir() {
                continue;
            }
            let mut found = Vec::new();
            self.search(&base, &mut found)?;
            batches.extend(found.into_iter().map(|dir| Batch::new(folder, dir)));
        }
        Ok(batches)
    }

    fn search(&self, dir: &Path, found: &mut Vec<PathBuf>) -> Result<(), RunError> {
        if self.matches_signature(dir) {
            debug!(dir = %dir.display(), "found measurement batch");
            found.push(dir.to_path_buf());
        }
        for child in sorted_entries(dir)? {
            let file_type = fs::symlink_metadata(&child)
                .map_err(|source| RunError::Io {
                    path: child.clone(),
                    source,
                })?
                .file_type();
            if file_type.is_dir() {
                self.search(&child, found)?;
            }
        }
        Ok(())
    }

    /// `<campaign>/Radiometria/<leaf>` with a non-empty campaign name.
    fn matches_signature(&self, dir: &Path) -> bool {
        let [parent, leaf] = self.kind.folder_signature();
        let name_of = |path: Option<&Path>| {
            path.and_then(Path::file_name)
                .map(|name| name.to_string_lossy().into_owned())
        };
        name_of(Some(dir)).as_deref() == Some(leaf)
            && name_of(dir.parent()).as_deref() == Some(parent)
            && name_of(dir.parent().and_then(Path::parent)).is_some_and(|name| !name.is_empty())
    }

    /// Text exports in `dir`, ordered by the acquisition number before the
    /// extension. Files without a number sort as 0; ties fall back to the name.
    pub fn data_files(&self, dir: &Path) -> Result<Vec<PathBuf>, RunError> {
        let mut files: Vec<(u64, String, PathBuf)> = sorted_entries(dir)?
            .into_iter()
            .filter(|path| path.is_file())
            .filter_map(|path| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                name.to_ascii_lowercase()
                    .ends_with(".txt")
                    .then(|| (self.sequence_number(&name), name, path))
            })
            .collect();
        files.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        Ok(files.into_iter().map(|(_, _, path)| path).collect())
    }

    fn sequence_number(&self, name: &str) -> u64 {
        self.sequence
            .captures(name)
            .and_then(|captures| captures.get(1))
            .and_then(|digits| digits.as_str().parse().ok())
            .unwrap_or(0)
    }
}

fn campaign_of(batch_dir: &Path) -> String {
    batch_dir
        .parent()
        .and_then(Path::parent)
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, RunError> {
    let io_err = |source| RunError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    entries.sort();
    Ok(entries)
}
