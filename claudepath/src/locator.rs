//! Resolution of the real project path behind an encoded directory name.
//!
//! The project directory name under `~/.claude/projects/` is a lossy encoding
//! of the project path (see [`codec`](crate::codec)). The locator recovers the
//! real path with three tiers, first success wins:
//!
//! 1. **Index metadata**: `originalPath` in `sessions-index.json`, else the
//!    first entry's `projectPath`. Null values fall through.
//! 2. **Session content**: the first non-empty `cwd` found in a top-level
//!    transcript.
//! 3. **File system probe**: a depth-first search that splits the encoded name
//!    on `-` and, at each level, tries every join of the pending segments
//!    against directories that actually exist.
//!
//! The probe only asks one question of the file system, "is this a
//! directory?", through the [`DirectoryOracle`] trait, so it can be tested
//! against an in-memory set of directories.
//!
//! # Example
//!
//! ```
//! use std::collections::HashSet;
//! use std::path::PathBuf;
//! use claudepath::locator::probe;
//!
//! let dirs: HashSet<PathBuf> = ["/Users", "/Users/alice", "/Users/alice/my-app"]
//!     .into_iter()
//!     .map(PathBuf::from)
//!     .collect();
//!
//! assert_eq!(
//!     probe("-Users-alice-my-app", &dirs),
//!     Some(PathBuf::from("/Users/alice/my-app"))
//! );
//! ```

use std::collections::HashSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use tracing::{debug, trace};

use crate::codec::{self, SUBSTITUTE};
use crate::config::Config;
use crate::error::{IoResultExt, Result};
use crate::types::{SessionsIndex, TRANSCRIPT_EXTENSION};

/// Answers whether a path is an existing directory.
pub trait DirectoryOracle {
    fn is_dir(&self, path: &Path) -> bool;
}

/// Asks the real file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsOracle;

impl DirectoryOracle for FsOracle {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }
}

/// A fixed snapshot of existing directories.
impl DirectoryOracle for HashSet<PathBuf> {
    fn is_dir(&self, path: &Path) -> bool {
        self.contains(path)
    }
}

/// Which tier produced a resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    IndexMetadata,
    SessionContent,
    FilesystemProbe,
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IndexMetadata => "index",
            Self::SessionContent => "session",
            Self::FilesystemProbe => "probe",
        })
    }
}

/// Outcome of resolving one encoded name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved { path: String, tier: ResolutionTier },
    /// Every tier failed. The project is listable but unmapped.
    Unresolved,
}

impl Resolution {
    #[must_use]
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Resolved { path, .. } => Some(path),
            Self::Unresolved => None,
        }
    }

    #[must_use]
    pub fn tier(&self) -> Option<ResolutionTier> {
        match self {
            Self::Resolved { tier, .. } => Some(*tier),
            Self::Unresolved => None,
        }
    }
}

/// One row of [`ProjectLocator::resolve_all`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectListing {
    /// Directory name under `projects/`.
    pub encoded_name: String,
    pub resolution: Resolution,
    /// Whether the resolved path is an existing directory.
    pub exists_on_disk: bool,
    /// Index entries, or top-level transcripts when there is no index.
    pub session_count: usize,
    /// Latest activity, from the index or the newest transcript mtime.
    pub last_modified: Option<String>,
}

/// Recovers the real path for an encoded name by probing directories.
///
/// Returns `None` when the name is not an absolute encoding or no existing
/// directory tree is consistent with it. When several reconstructions exist,
/// the one that splits earliest (shortest directory names first) wins.
#[must_use]
pub fn probe(encoded: &str, oracle: &impl DirectoryOracle) -> Option<PathBuf> {
    let rest = encoded.strip_prefix(SUBSTITUTE)?;
    if rest.is_empty() {
        return None;
    }
    let segments: Vec<&str> = rest.split(SUBSTITUTE).collect();
    probe_from(Path::new("/"), &segments, oracle)
}

fn probe_from(current: &Path, segments: &[&str], oracle: &impl DirectoryOracle) -> Option<PathBuf> {
    if segments.is_empty() {
        return Some(current.to_path_buf());
    }

    for take in 1..=segments.len() {
        let joined = segments[..take].join("-");
        for name in candidate_names(&joined) {
            let candidate = current.join(&name);
            if !oracle.is_dir(&candidate) {
                continue;
            }
            trace!(candidate = %candidate.display(), "Probe step");
            if let Some(found) = probe_from(&candidate, &segments[take..], oracle) {
                return Some(found);
            }
        }
    }
    None
}

/// Directory names a joined run of segments may stand for. A run starting with
/// an empty segment came from `--`, which is most often a hidden directory.
fn candidate_names(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    match joined.strip_prefix('-') {
        Some(hidden) if !hidden.is_empty() => vec![format!(".{hidden}"), joined.to_string()],
        _ => vec![joined.to_string()],
    }
}

/// Resolves encoded project directories under a data root.
#[derive(Debug, Clone)]
pub struct ProjectLocator<O = FsOracle> {
    projects_dir: PathBuf,
    oracle: O,
}

impl ProjectLocator<FsOracle> {
    /// A locator backed by the real file system.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_oracle(config, FsOracle)
    }
}

impl<O: DirectoryOracle> ProjectLocator<O> {
    /// A locator that probes through `oracle` instead of the file system.
    #[must_use]
    pub fn with_oracle(config: &Config, oracle: O) -> Self {
        Self {
            projects_dir: config.projects_dir(),
            oracle,
        }
    }

    /// Resolves one encoded directory name.
    #[must_use]
    pub fn resolve(&self, encoded_name: &str) -> Resolution {
        let dir = self.projects_dir.join(encoded_name);

        if let Some(path) = SessionsIndex::load(&dir).and_then(|i| i.project_path().map(str::to_string)) {
            debug!(encoded_name, path = %path, "Resolved from sessions index");
            return Resolution::Resolved {
                path,
                tier: ResolutionTier::IndexMetadata,
            };
        }

        if let Some(path) = top_level_transcripts(&dir)
            .iter()
            .find_map(|file| read_cwd(file))
        {
            debug!(encoded_name, path = %path, "Resolved from session cwd");
            return Resolution::Resolved {
                path,
                tier: ResolutionTier::SessionContent,
            };
        }

        if let Some(path) = probe(encoded_name, &self.oracle) {
            debug!(encoded_name, path = %path.display(), "Resolved by probing the file system");
            return Resolution::Resolved {
                path: path.to_string_lossy().into_owned(),
                tier: ResolutionTier::FilesystemProbe,
            };
        }

        debug!(encoded_name, "Unresolved project directory");
        Resolution::Unresolved
    }

    /// Lists every project directory with its resolution, sorted by name.
    ///
    /// # Errors
    ///
    /// Fails only if the projects directory exists but cannot be read. A
    /// missing projects directory yields an empty list.
    pub fn resolve_all(&self) -> Result<Vec<ProjectListing>> {
        if !self.projects_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut names: Vec<String> = fs::read_dir(&self.projects_dir)
            .at(&self.projects_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();

        Ok(names
            .into_iter()
            .map(|encoded_name| self.listing(encoded_name))
            .collect())
    }

    fn listing(&self, encoded_name: String) -> ProjectListing {
        let dir = self.projects_dir.join(&encoded_name);
        let index = SessionsIndex::load(&dir).unwrap_or_default();
        let transcripts = top_level_transcripts(&dir);

        let session_count = if index.entries.is_empty() {
            transcripts.len()
        } else {
            index.entries.len()
        };

        let last_modified = index
            .last_modified()
            .map(str::to_string)
            .or_else(|| newest_mtime(&transcripts));

        let resolution = self.resolve(&encoded_name);
        let exists_on_disk = resolution
            .path()
            .is_some_and(|p| self.oracle.is_dir(Path::new(p)));

        ProjectListing {
            encoded_name,
            resolution,
            exists_on_disk,
            session_count,
            last_modified,
        }
    }

    /// Finds the data directory holding state for an absolute project path.
    ///
    /// Tries the computed encoding first, then scans every index for a matching
    /// `originalPath` or first-entry `projectPath` (covers directories whose
    /// name diverged from the recorded path).
    #[must_use]
    pub fn find_project_dir(&self, project_path: &str) -> Option<PathBuf> {
        let wanted = trim_trailing_separator(project_path);
        let direct = self.projects_dir.join(codec::encode(wanted));
        if direct.is_dir() {
            return Some(direct);
        }

        let entries = fs::read_dir(&self.projects_dir).ok()?;
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();

        dirs.into_iter().find(|dir| {
            let Some(index) = SessionsIndex::load(dir) else {
                return false;
            };
            let original = index.original_path.as_deref().map(trim_trailing_separator);
            let first_entry = index
                .entries
                .first()
                .and_then(|e| e.project_path.as_deref())
                .map(trim_trailing_separator);
            original == Some(wanted) || first_entry == Some(wanted)
        })
    }
}

fn trim_trailing_separator(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Top-level `*.jsonl` files of a project directory, sorted by name.
fn top_level_transcripts(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(TRANSCRIPT_EXTENSION))
        .collect();
    files.sort();
    files
}

/// Streams a transcript and returns the first non-empty `cwd`.
fn read_cwd(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            continue;
        };
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.contains("\"cwd\"") {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            if let Some(cwd) = value.get("cwd").and_then(|c| c.as_str()) {
                if !cwd.is_empty() {
                    return Some(cwd.to_string());
                }
            }
        }
    }
    None
}

fn newest_mtime(files: &[PathBuf]) -> Option<String> {
    files
        .iter()
        .filter_map(|f| fs::metadata(f).and_then(|m| m.modified()).ok())
        .max()
        .map(|t: SystemTime| {
            DateTime::<Local>::from(t)
                .format("%Y-%m-%dT%H:%M:%S")
                .to_string()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dirs(paths: &[&str]) -> HashSet<PathBuf> {
        paths.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn probe_prefers_existing_hyphenated_directory() {
        let oracle = dirs(&["/Users", "/Users/alice", "/Users/alice/old-app"]);
        assert_eq!(
            probe("-Users-alice-old-app", &oracle),
            Some(PathBuf::from("/Users/alice/old-app"))
        );
    }

    #[test]
    fn probe_backtracks_out_of_dead_ends() {
        // /Users/alice/old exists but has no "app" child
        let oracle = dirs(&[
            "/Users",
            "/Users/alice",
            "/Users/alice/old",
            "/Users/alice/old-app",
        ]);
        assert_eq!(
            probe("-Users-alice-old-app", &oracle),
            Some(PathBuf::from("/Users/alice/old-app"))
        );
    }

    #[test]
    fn probe_handles_multiple_hyphens_in_one_name() {
        let oracle = dirs(&["/home", "/home/u", "/home/u/my-cool-project"]);
        assert_eq!(
            probe("-home-u-my-cool-project", &oracle),
            Some(PathBuf::from("/home/u/my-cool-project"))
        );
    }

    #[test]
    fn probe_tries_hidden_directories_for_double_hyphen() {
        let oracle = dirs(&["/home", "/home/u", "/home/u/.config", "/home/u/.config/app"]);
        assert_eq!(
            probe("-home-u--config-app", &oracle),
            Some(PathBuf::from("/home/u/.config/app"))
        );
    }

    #[test]
    fn probe_returns_none_when_nothing_exists() {
        let oracle = dirs(&["/Users"]);
        assert_eq!(probe("-Users-ghost-app", &oracle), None);
    }

    #[test]
    fn probe_rejects_relative_encodings() {
        let oracle = dirs(&["/Users"]);
        assert_eq!(probe("Users", &oracle), None);
        assert_eq!(probe("-", &oracle), None);
    }

    #[test]
    fn probe_recovers_round_trip_for_plain_paths() {
        let oracle = dirs(&["/srv", "/srv/code", "/srv/code/app"]);
        let encoded = codec::encode("/srv/code/app");
        assert_eq!(probe(&encoded, &oracle), Some(PathBuf::from(codec::decode(&encoded))));
    }

    #[test]
    fn candidate_names_for_double_hyphen() {
        assert_eq!(candidate_names("-git"), vec![".git".to_string(), "-git".to_string()]);
        assert_eq!(candidate_names("a-b"), vec!["a-b".to_string()]);
        assert!(candidate_names("").is_empty());
    }

    #[test]
    fn tier_display() {
        assert_eq!(ResolutionTier::IndexMetadata.to_string(), "index");
        assert_eq!(ResolutionTier::FilesystemProbe.to_string(), "probe");
    }

    #[test]
    fn trailing_separator_trimmed_except_root() {
        assert_eq!(trim_trailing_separator("/a/b/"), "/a/b");
        assert_eq!(trim_trailing_separator("/"), "/");
    }
}
