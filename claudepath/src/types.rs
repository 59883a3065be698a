//! Claude Code on-disk record types.
//!
//! Only the fields claudepath reads are modelled. Every field is optional:
//! Claude Code has been observed writing `"originalPath": null`, and older
//! projects have no index at all. Rewriting never goes through these types;
//! it works on [`serde_json::Value`] so unknown fields survive untouched.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

/// Per-project index file name.
pub const SESSIONS_INDEX: &str = "sessions-index.json";

/// Extension of session transcript files.
pub const TRANSCRIPT_EXTENSION: &str = "jsonl";

/// `sessions-index.json` at the root of a project data directory.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionsIndex {
    /// The absolute project path the directory was created for.
    #[serde(default)]
    pub original_path: Option<String>,

    /// One entry per session.
    #[serde(default)]
    pub entries: Vec<SessionIndexEntry>,
}

/// One session in `sessions-index.json`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    #[serde(default)]
    pub session_id: Option<String>,

    /// The absolute project path the session ran in.
    #[serde(default)]
    pub project_path: Option<String>,

    /// Absolute path of the transcript, inside the data root.
    #[serde(default)]
    pub full_path: Option<String>,

    /// RFC 3339 timestamp of the last activity.
    #[serde(default)]
    pub modified: Option<String>,
}

impl SessionsIndex {
    /// Reads the index in `project_dir`, returning `None` when it is missing
    /// or unparsable.
    #[must_use]
    pub fn load(project_dir: &Path) -> Option<Self> {
        let path = project_dir.join(SESSIONS_INDEX);
        let content = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(index) => Some(index),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unparsable sessions index");
                None
            }
        }
    }

    /// The project path this index records: `originalPath` if set, else the
    /// first entry's `projectPath`.
    #[must_use]
    pub fn project_path(&self) -> Option<&str> {
        non_empty(self.original_path.as_deref()).or_else(|| {
            self.entries
                .iter()
                .find_map(|e| non_empty(e.project_path.as_deref()))
        })
    }

    /// Latest `modified` timestamp across entries.
    #[must_use]
    pub fn last_modified(&self) -> Option<&str> {
        self.entries
            .iter()
            .filter_map(|e| non_empty(e.modified.as_deref()))
            .max()
    }
}

/// One line of `history.jsonl`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    #[serde(default)]
    pub display: Option<String>,

    /// Absolute path of the project the prompt was entered in.
    #[serde(default)]
    pub project: Option<String>,
}

/// The session id a file in a project directory would belong to.
///
/// Transcripts live at `<session-id>.jsonl`; subagent transcripts and other
/// per-session state live under `<session-id>/`. Any top-level directory name
/// is returned, so callers check it against the known ids.
#[must_use]
pub fn session_id_of(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?.as_os_str().to_str()?;
    if components.next().is_some() {
        return Some(first.to_string());
    }
    first
        .strip_suffix(".jsonl")
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_original_path_falls_back_to_entry() {
        let index: SessionsIndex = serde_json::from_str(
            r#"{"originalPath": null, "entries": [
                {"sessionId": "a", "projectPath": null},
                {"sessionId": "b", "projectPath": "/Users/alice/app"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(index.project_path(), Some("/Users/alice/app"));
    }

    #[test]
    fn original_path_wins() {
        let index: SessionsIndex = serde_json::from_str(
            r#"{"originalPath": "/a", "entries": [{"projectPath": "/b"}]}"#,
        )
        .unwrap();
        assert_eq!(index.project_path(), Some("/a"));
    }

    #[test]
    fn empty_index_has_no_path() {
        let index: SessionsIndex = serde_json::from_str("{}").unwrap();
        assert_eq!(index.project_path(), None);
        assert_eq!(index.last_modified(), None);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let index: SessionsIndex = serde_json::from_str(
            r#"{"version": 1, "originalPath": "/a", "entries": [{"firstPrompt": "hi", "messageCount": 2}]}"#,
        )
        .unwrap();
        assert_eq!(index.entries.len(), 1);
    }

    #[test]
    fn last_modified_picks_latest() {
        let index: SessionsIndex = serde_json::from_str(
            r#"{"entries": [
                {"modified": "2026-01-02T00:00:00.000Z"},
                {"modified": "2026-03-01T00:00:00.000Z"},
                {"modified": null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(index.last_modified(), Some("2026-03-01T00:00:00.000Z"));
    }

    #[test]
    fn session_ids_from_relative_paths() {
        assert_eq!(session_id_of(Path::new("abc.jsonl")), Some("abc".to_string()));
        assert_eq!(
            session_id_of(Path::new("abc/subagents/agent-1.jsonl")),
            Some("abc".to_string())
        );
        assert_eq!(session_id_of(Path::new("sessions-index.json")), None);
        assert_eq!(session_id_of(Path::new("notes.md")), None);
    }
}
