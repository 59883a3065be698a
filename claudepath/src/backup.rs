//! Timestamped snapshots of everything a remap may touch.
//!
//! A snapshot lives at `{data_root}/backups/claudepath/{YYYYMMDD_HHMMSS}`
//! and mirrors the data root layout (`projects/<encoded>/...`,
//! `history.jsonl`) next to a `manifest.json` listing each item's original
//! location. Items that did not exist when the snapshot was taken are listed
//! too: restoring removes whatever has since appeared at their location.
//!
//! Snapshots are assembled in a `.partial` staging directory and renamed into
//! place once complete, so a listed snapshot is always whole.
//!
//! # Restore
//!
//! Restoring an item first renames the current content aside to a
//! `.claudepath-old` sibling, then copies the snapshot in. If the copy fails
//! the partial copy is removed and the aside content renamed back. Aside
//! copies are deleted only once every item has been restored.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::utils::fs::{copy_recursive, free_sibling, remove_path};

/// Name of the manifest file inside each snapshot.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Suffix of the staging directory used while a snapshot is being written.
const PARTIAL_SUFFIX: &str = ".partial";

/// Suffix for content renamed aside during restore.
const ASIDE_SUFFIX: &str = ".claudepath-old";

/// Snapshot directory name format.
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Errors that can occur while taking or restoring snapshots.
#[derive(Error, Debug)]
pub enum BackupError {
    /// No snapshot with the given timestamp.
    #[error("no backup named {0}")]
    NotFound(String),

    /// The backup directory holds no snapshots.
    #[error("no backups found in {}", .0.display())]
    Empty(PathBuf),

    /// An item label is not a plain relative path.
    #[error("invalid backup label: {0}")]
    InvalidLabel(String),

    /// File system error.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The manifest could not be read or written.
    #[error("invalid manifest at {}: {source}", .path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Restoring an item failed; the pre-restore content was put back.
    #[error("failed to restore {}: {source}", .target.display())]
    Restore {
        target: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Restoring an item failed and its pre-restore content could not be put
    /// back either.
    #[error(
        "failed to restore {} and could not put back its previous content: {source}",
        .target.display()
    )]
    Inconsistent {
        target: PathBuf,
        side: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
}

impl BackupError {
    /// The location a failed restore was writing to.
    #[must_use]
    pub fn target(&self) -> Option<&Path> {
        match self {
            Self::Restore { target, .. } | Self::Inconsistent { target, .. } => Some(target),
            Self::Io { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Where the pre-restore content was left, if it could not be put back.
    #[must_use]
    pub fn side(&self) -> Option<&Path> {
        match self {
            Self::Inconsistent { side, .. } => side.as_deref(),
            _ => None,
        }
    }
}

trait BackupIoExt<T> {
    fn at(self, path: &Path) -> Result<T, BackupError>;
}

impl<T> BackupIoExt<T> for io::Result<T> {
    fn at(self, path: &Path) -> Result<T, BackupError> {
        self.map_err(|source| BackupError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Whether a snapshotted item is a file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Directory,
    /// Did not exist when the snapshot was taken.
    Absent,
}

/// One entry of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    /// Relative location inside the snapshot, e.g. `projects/-Users-a-app`.
    pub label: String,
    /// Absolute location the item was copied from.
    pub original: PathBuf,
    pub kind: ItemKind,
}

impl ManifestItem {
    #[must_use]
    pub fn existed(&self) -> bool {
        self.kind != ItemKind::Absent
    }
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// RFC 3339 creation time.
    pub created_at: String,
    /// claudepath version that wrote the snapshot.
    pub version: String,
    pub items: Vec<ManifestItem>,
}

/// Something to include in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupItem {
    pub label: String,
    pub path: PathBuf,
}

impl BackupItem {
    pub fn new(label: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            path: path.into(),
        }
    }
}

/// A complete snapshot on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSnapshot {
    /// Directory name, e.g. `20260301_142233`.
    pub timestamp: String,
    pub path: PathBuf,
    pub manifest: Manifest,
}

/// The snapshot store under `{data_root}/backups/claudepath`.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.backup_root())
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copies every item into a new snapshot.
    ///
    /// # Errors
    ///
    /// Fails if a label is not a plain relative path or if any copy fails.
    /// The staging directory is removed on failure.
    pub fn snapshot(&self, items: &[BackupItem]) -> Result<BackupSnapshot, BackupError> {
        for item in items {
            validate_label(&item.label)?;
        }
        fs::create_dir_all(&self.root).at(&self.root)?;

        let (timestamp, staging) = self.create_staging()?;
        let result = Self::fill(&staging, items);
        let manifest = match result {
            Ok(manifest) => manifest,
            Err(e) => {
                if let Err(cleanup) = remove_path(&staging) {
                    warn!(path = %staging.display(), error = %cleanup, "Failed to remove partial backup");
                }
                return Err(e);
            }
        };

        let path = self.root.join(&timestamp);
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = remove_path(&staging);
            return Err(BackupError::Io { path, source: e });
        }

        info!(path = %path.display(), items = manifest.items.len(), "Backup created");
        Ok(BackupSnapshot {
            timestamp,
            path,
            manifest,
        })
    }

    fn create_staging(&self) -> Result<(String, PathBuf), BackupError> {
        let base = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let mut n = 0usize;
        loop {
            let name = if n == 0 {
                base.clone()
            } else {
                format!("{base}_{n}")
            };
            n += 1;
            if self.root.join(&name).exists() {
                continue;
            }
            let staging = self.root.join(format!("{name}{PARTIAL_SUFFIX}"));
            match fs::create_dir(&staging) {
                Ok(()) => return Ok((name, staging)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(BackupError::Io { path: staging, source: e }),
            }
        }
    }

    fn fill(staging: &Path, items: &[BackupItem]) -> Result<Manifest, BackupError> {
        let mut entries = Vec::with_capacity(items.len());
        for item in items {
            let kind = match fs::symlink_metadata(&item.path) {
                Ok(meta) if meta.is_dir() => ItemKind::Directory,
                Ok(_) => ItemKind::File,
                Err(e) if e.kind() == io::ErrorKind::NotFound => ItemKind::Absent,
                Err(e) => return Err(BackupError::Io { path: item.path.clone(), source: e }),
            };
            if kind != ItemKind::Absent {
                copy_recursive(&item.path, &staging.join(&item.label)).at(&item.path)?;
            }
            debug!(label = %item.label, kind = ?kind, "Backed up item");
            entries.push(ManifestItem {
                label: item.label.clone(),
                original: item.path.clone(),
                kind,
            });
        }

        let manifest = Manifest {
            created_at: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            items: entries,
        };
        let manifest_path = staging.join(MANIFEST_FILE);
        let bytes = serde_json::to_vec_pretty(&manifest).map_err(|source| BackupError::Manifest {
            path: manifest_path.clone(),
            source,
        })?;
        fs::write(&manifest_path, bytes).at(&manifest_path)?;
        Ok(manifest)
    }

    /// All complete snapshots, oldest first.
    ///
    /// # Errors
    ///
    /// Fails if the backup directory cannot be read. Directories without a
    /// readable manifest are skipped.
    pub fn list(&self) -> Result<Vec<BackupSnapshot>, BackupError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(BackupError::Io { path: self.root.clone(), source: e }),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry.at(&self.root)?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.ends_with(PARTIAL_SUFFIX) || !entry.path().is_dir() {
                continue;
            }
            match self.open(&name) {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => debug!(name = %name, error = %e, "Skipping unreadable backup"),
            }
        }
        snapshots.sort_by_key(|s| sort_key(&s.timestamp));
        Ok(snapshots)
    }

    /// The newest snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::Empty`] when there are none.
    pub fn latest(&self) -> Result<BackupSnapshot, BackupError> {
        self.list()?
            .pop()
            .ok_or_else(|| BackupError::Empty(self.root.clone()))
    }

    /// Opens the snapshot with the given directory name.
    ///
    /// # Errors
    ///
    /// Returns [`BackupError::NotFound`] when it does not exist.
    pub fn open(&self, timestamp: &str) -> Result<BackupSnapshot, BackupError> {
        if validate_label(timestamp).is_err() || timestamp.contains('/') {
            return Err(BackupError::NotFound(timestamp.to_string()));
        }
        let path = self.root.join(timestamp);
        let manifest_path = path.join(MANIFEST_FILE);
        let content = match fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BackupError::NotFound(timestamp.to_string()))
            }
            Err(e) => return Err(BackupError::Io { path: manifest_path, source: e }),
        };
        let manifest = serde_json::from_str(&content).map_err(|source| BackupError::Manifest {
            path: manifest_path,
            source,
        })?;
        Ok(BackupSnapshot {
            timestamp: timestamp.to_string(),
            path,
            manifest,
        })
    }

    /// Restores the snapshot with the given name, or the newest one.
    ///
    /// # Errors
    ///
    /// See [`BackupSnapshot::restore`].
    pub fn restore_timestamp(&self, timestamp: Option<&str>) -> Result<BackupSnapshot, BackupError> {
        let snapshot = match timestamp {
            Some(ts) => self.open(ts)?,
            None => self.latest()?,
        };
        snapshot.restore()?;
        Ok(snapshot)
    }

    /// Deletes all but the newest `keep` snapshots and returns what was
    /// removed.
    ///
    /// # Errors
    ///
    /// Fails on the first snapshot that cannot be deleted.
    pub fn prune(&self, keep: usize) -> Result<Vec<PathBuf>, BackupError> {
        let snapshots = self.list()?;
        let excess = snapshots.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);
        for snapshot in snapshots.into_iter().take(excess) {
            remove_path(&snapshot.path).at(&snapshot.path)?;
            debug!(path = %snapshot.path.display(), "Pruned backup");
            removed.push(snapshot.path);
        }
        Ok(removed)
    }
}

impl BackupSnapshot {
    /// Where an item's content is stored inside this snapshot.
    #[must_use]
    pub fn stored_path(&self, item: &ManifestItem) -> PathBuf {
        self.path.join(&item.label)
    }

    /// Puts every item back at its original location.
    ///
    /// On failure every item restored so far is swapped back, leaving the
    /// state as it was before the call.
    ///
    /// # Errors
    ///
    /// [`BackupError::Restore`] when an item could not be restored but the
    /// previous state was put back; [`BackupError::Inconsistent`] when even
    /// that failed.
    pub fn restore(&self) -> Result<(), BackupError> {
        let mut swapped: Vec<(PathBuf, Option<PathBuf>)> = Vec::new();

        for item in &self.manifest.items {
            let target = item.original.clone();
            let side = match set_aside(&target) {
                Ok(side) => side,
                Err(source) => {
                    undo(&swapped)?;
                    return Err(BackupError::Restore { target, source });
                }
            };
            swapped.push((target.clone(), side));

            if let Err(source) = self.put_back(item) {
                undo(&swapped)?;
                return Err(BackupError::Restore { target, source });
            }
        }

        for (_, side) in &swapped {
            if let Some(side) = side {
                if let Err(e) = remove_path(side) {
                    warn!(path = %side.display(), error = %e, "Failed to remove pre-restore copy");
                }
            }
        }
        info!(path = %self.path.display(), "Backup restored");
        Ok(())
    }

    fn put_back(&self, item: &ManifestItem) -> io::Result<()> {
        if !item.existed() {
            return Ok(());
        }
        let stored = self.stored_path(item);
        if !stored.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("backup content missing: {}", stored.display()),
            ));
        }
        copy_recursive(&stored, &item.original)
    }
}

fn set_aside(target: &Path) -> io::Result<Option<PathBuf>> {
    if fs::symlink_metadata(target).is_err() {
        return Ok(None);
    }
    let side = free_sibling(target, ASIDE_SUFFIX);
    fs::rename(target, &side)?;
    Ok(Some(side))
}

/// Reverses restored items, newest first.
fn undo(swapped: &[(PathBuf, Option<PathBuf>)]) -> Result<(), BackupError> {
    for (target, side) in swapped.iter().rev() {
        let result = remove_path(target).and_then(|()| match side {
            Some(side) => fs::rename(side, target),
            None => Ok(()),
        });
        if let Err(source) = result {
            return Err(BackupError::Inconsistent {
                target: target.clone(),
                side: side.clone(),
                source,
            });
        }
    }
    Ok(())
}

fn validate_label(label: &str) -> Result<(), BackupError> {
    let path = Path::new(label);
    let plain = !label.is_empty()
        && label != MANIFEST_FILE
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(BackupError::InvalidLabel(label.to_string()))
    }
}

/// Orders `20260101_000000` < `20260101_000000_2` < `20260101_000000_10`.
fn sort_key(name: &str) -> (String, usize) {
    match name.get(15..).and_then(|rest| rest.strip_prefix('_')) {
        Some(n) => (name[..15].to_string(), n.parse().unwrap_or(usize::MAX)),
        None => (name.to_string(), 0),
    }
}
