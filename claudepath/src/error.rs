//! Error types for claudepath.
//!
//! This module defines the crate-wide error type used by the remapping engine,
//! providing structured error handling with clear, human-readable messages.
//! Module-specific errors ([`ConfigError`], [`PreconditionError`],
//! [`BackupError`]) convert into [`ClaudepathError`] via `#[from]`.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::backup::BackupError;
use crate::config::ConfigError;

/// Errors raised while validating a remap before anything is touched.
///
/// None of these require a rollback: they are reported before any backup is
/// taken or any file is mutated.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// Source and destination normalize to the same path.
    #[error("source and destination are the same path: {0}")]
    SamePath(String),

    /// No Claude Code data directory exists for the source path.
    #[error("no Claude Code data found for {0}\nRun 'claudepath list' to see tracked projects.")]
    SourceNotFound(String),

    /// The real source directory is missing (`mv` only).
    #[error("source directory does not exist: {0}")]
    SourceMissing(String),

    /// The destination data directory already exists and merge is disabled.
    #[error(
        "destination Claude data directory already exists: {}\nUse --merge to combine sessions from both directories.",
        .0.display()
    )]
    DestinationExists(PathBuf),

    /// The real destination directory must exist for `remap`.
    #[error(
        "destination directory does not exist: {0}\nThe directory must already exist for 'remap'. Use 'claudepath mv' if you haven't moved it yet."
    )]
    DestinationMissing(String),

    /// The real destination directory is occupied (`mv` only).
    #[error(
        "destination directory already exists and is not empty: {0}\nIf you already moved the files manually, use 'claudepath remap' instead."
    )]
    DestinationNotEmpty(String),

    /// The destination lies inside the directory being moved (`mv` only).
    #[error("cannot move {old} into its own subdirectory {new}")]
    DestinationInsideSource { old: String, new: String },
}

/// Errors that can occur during claudepath operations.
#[derive(Error, Debug)]
pub enum ClaudepathError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The remap was rejected before any mutation.
    #[error("{0}")]
    Precondition(#[from] PreconditionError),

    /// File system I/O error on a specific path.
    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A JSON document that had to be understood could not be parsed.
    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Snapshot creation or restoration failed.
    #[error("backup error: {0}")]
    Backup(#[from] BackupError),

    /// Mutation failed and every change was restored from the snapshot.
    #[error("{cause}\nChanges have been rolled back from backup {}", .snapshot.display())]
    RolledBack {
        #[source]
        cause: Box<ClaudepathError>,
        snapshot: PathBuf,
    },

    /// Mutation failed and backups were disabled, so nothing was restored.
    #[error("{cause}\nNo backup was taken (--no-backup); changes could not be rolled back")]
    NotRolledBack {
        #[source]
        cause: Box<ClaudepathError>,
    },

    /// Mutation failed and so did the rollback. Data needs manual recovery.
    #[error(
        "FATAL: {cause}\nRollback also failed: {rollback}\nIntended target: {}\nPre-restore copy: {}\nBackup: {}",
        .target.display(),
        display_side(.side),
        .snapshot.display()
    )]
    FatalInconsistency {
        #[source]
        cause: Box<ClaudepathError>,
        rollback: BackupError,
        target: PathBuf,
        side: Option<PathBuf>,
        snapshot: PathBuf,
    },
}

fn display_side(side: &Option<PathBuf>) -> String {
    side.as_deref()
        .map_or_else(|| "(none)".to_string(), |p| p.display().to_string())
}

/// A specialized `Result` type for claudepath operations.
pub type Result<T> = std::result::Result<T, ClaudepathError>;

/// Attaches the offending path to an [`io::Error`].
pub trait IoResultExt<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| ClaudepathError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_exists_mentions_merge_hint() {
        let err = PreconditionError::DestinationExists(PathBuf::from("/d/projects/-a-b"));
        let text = err.to_string();
        assert!(text.contains("/d/projects/-a-b"));
        assert!(text.contains("--merge"));
    }

    #[test]
    fn same_path_display() {
        let err = PreconditionError::SamePath("/a/b".to_string());
        assert_eq!(
            err.to_string(),
            "source and destination are the same path: /a/b"
        );
    }

    #[test]
    fn precondition_converts_into_crate_error() {
        let err: ClaudepathError = PreconditionError::SourceNotFound("/x".to_string()).into();
        assert!(matches!(err, ClaudepathError::Precondition(_)));
    }

    #[test]
    fn io_error_carries_path() {
        let res: io::Result<()> = Err(io::Error::new(io::ErrorKind::NotFound, "gone"));
        let err = res.at("/tmp/some/file").unwrap_err();
        assert!(matches!(err, ClaudepathError::Io { ref path, .. } if path == Path::new("/tmp/some/file")));
        assert!(err.to_string().contains("/tmp/some/file"));
    }

    #[test]
    fn rolled_back_preserves_source_chain() {
        use std::error::Error;

        let cause = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = ClaudepathError::RolledBack {
            cause: Box::new(ClaudepathError::Io {
                path: PathBuf::from("/f"),
                source: cause,
            }),
            snapshot: PathBuf::from("/b/20260101_000000"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("rolled back"));
    }

    #[test]
    fn fatal_inconsistency_names_both_paths() {
        let err = ClaudepathError::FatalInconsistency {
            cause: Box::new(ClaudepathError::Precondition(PreconditionError::SamePath(
                "/x".to_string(),
            ))),
            rollback: BackupError::NotFound("20260101_000000".to_string()),
            target: PathBuf::from("/data/projects/-a"),
            side: Some(PathBuf::from("/data/projects/-a.claudepath-old")),
            snapshot: PathBuf::from("/data/backups/claudepath/20260101_000000"),
        };
        let text = err.to_string();
        assert!(text.contains("/data/projects/-a\n"));
        assert!(text.contains("/data/projects/-a.claudepath-old"));
    }
}
