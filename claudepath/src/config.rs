//! Configuration module for claudepath.
//!
//! Configuration is an explicit value threaded through every component; no
//! component reads ambient global state. Defaults come from environment
//! variables and are then overridden by command-line flags.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `CLAUDEPATH_CLAUDE_DIR` | No | `~/.claude` | Claude Code data root |
//! | `CLAUDEPATH_BACKUP_KEEP` | No | (keep all) | Number of backups to retain after a successful remap |
//! | `CLAUDEPATH_NO_UPDATE_CHECK` | No | unset | Disable the background version check when set |
//!
//! # Example
//!
//! ```no_run
//! use claudepath::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Data root: {}", config.data_root.display());
//! ```

use std::env;
use std::path::PathBuf;

use directories::BaseDirs;
use thiserror::Error;

/// Default Claude Code directory name relative to home.
const DEFAULT_CLAUDE_DIR: &str = ".claude";

/// Directory under the data root holding one directory per project.
const PROJECTS_DIR: &str = "projects";

/// Global cross-project prompt log.
const HISTORY_FILE: &str = "history.jsonl";

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine home directory.
    #[error("failed to determine home directory")]
    NoHomeDirectory,
}

/// Configuration for a claudepath invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// The Claude Code data root (normally `~/.claude`).
    pub data_root: PathBuf,

    /// Compute and report changes without writing anything.
    pub dry_run: bool,

    /// Take a snapshot before mutating. Disabling this also disables rollback.
    pub backup: bool,

    /// Allow the destination project directory to exist and merge into it.
    pub merge: bool,

    /// Emit per-file detail.
    pub verbose: bool,

    /// Number of snapshots to retain after a successful remap.
    /// If `None`, every snapshot is kept.
    pub backup_keep: Option<usize>,

    /// Whether the background version check may run.
    pub update_check: bool,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `CLAUDEPATH_BACKUP_KEEP` is set but is not a positive integer
    /// - The home directory cannot be determined and `CLAUDEPATH_CLAUDE_DIR` is unset
    pub fn from_env() -> Result<Self, ConfigError> {
        // Optional: CLAUDEPATH_CLAUDE_DIR (default: ~/.claude)
        let data_root = match env::var("CLAUDEPATH_CLAUDE_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => {
                let base_dirs = BaseDirs::new().ok_or(ConfigError::NoHomeDirectory)?;
                base_dirs.home_dir().join(DEFAULT_CLAUDE_DIR)
            }
        };

        // Optional: CLAUDEPATH_BACKUP_KEEP (default: keep all, must be > 0)
        let backup_keep = match env::var("CLAUDEPATH_BACKUP_KEEP") {
            Ok(val) => {
                let keep = val
                    .parse::<usize>()
                    .map_err(|_| ConfigError::InvalidValue {
                        key: "CLAUDEPATH_BACKUP_KEEP".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                if keep == 0 {
                    return Err(ConfigError::InvalidValue {
                        key: "CLAUDEPATH_BACKUP_KEEP".to_string(),
                        message: "backup count must be greater than 0".to_string(),
                    });
                }
                Some(keep)
            }
            Err(_) => None,
        };

        let update_check = env::var_os("CLAUDEPATH_NO_UPDATE_CHECK").is_none();

        Ok(Self {
            backup_keep,
            update_check,
            ..Self::with_data_root(data_root)
        })
    }

    /// Creates a configuration rooted at an explicit data directory with
    /// defaults for everything else. Tests use this to point at a temporary
    /// root.
    #[must_use]
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            dry_run: false,
            backup: true,
            merge: false,
            verbose: false,
            backup_keep: None,
            update_check: false,
        }
    }

    /// `{data_root}/projects`.
    #[must_use]
    pub fn projects_dir(&self) -> PathBuf {
        self.data_root.join(PROJECTS_DIR)
    }

    /// `{data_root}/history.jsonl`.
    #[must_use]
    pub fn history_path(&self) -> PathBuf {
        self.data_root.join(HISTORY_FILE)
    }

    /// `{data_root}/backups/claudepath`.
    #[must_use]
    pub fn backup_root(&self) -> PathBuf {
        self.data_root.join("backups").join("claudepath")
    }

    /// The data directory a given encoded name lives in.
    #[must_use]
    pub fn project_data_dir(&self, encoded: &str) -> PathBuf {
        self.projects_dir().join(encoded)
    }
}
