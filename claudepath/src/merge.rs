//! Merging a source project data directory into an existing destination.
//!
//! Sessions are identified by the `sessionId`s in `sessions-index.json` plus
//! the stems of top-level `*.jsonl` transcripts. A subdirectory belongs to a
//! session only when its name is one of those ids.
//!
//! - Sessions only in the source are carried over with all their files.
//! - Sessions in both are kept from the destination and reported.
//! - Other files are carried when the destination lacks them, otherwise the
//!   destination copy wins and a warning is recorded.
//!
//! The merged index is the destination's entries followed by the carried
//! source entries, or the source index as-is when the destination has none.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{ClaudepathError, IoResultExt, Result};
use crate::types::{session_id_of, SessionsIndex, SESSIONS_INDEX, TRANSCRIPT_EXTENSION};
use crate::utils::fs::{atomic_write, copy_recursive, remove_path};

/// What a merge will do, computed without touching anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergePlan {
    pub source: PathBuf,
    pub destination: PathBuf,
    /// Sessions present only in the source.
    pub carried_sessions: Vec<String>,
    /// Sessions present in both; the destination copy is kept.
    pub skipped_sessions: Vec<String>,
    /// Files to copy, relative to the source directory.
    pub carried_files: Vec<PathBuf>,
    pub warnings: Vec<String>,
}

/// Plans and applies data directory merges.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeCoordinator;

impl MergeCoordinator {
    /// Computes the merge of `source` into `destination`.
    ///
    /// # Errors
    ///
    /// Fails if either directory cannot be walked.
    pub fn plan(source: &Path, destination: &Path) -> Result<MergePlan> {
        let source_ids = session_ids(source)?;
        let dest_ids = session_ids(destination)?;

        let mut plan = MergePlan {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            ..MergePlan::default()
        };

        for id in &source_ids {
            if dest_ids.contains(id) {
                plan.skipped_sessions.push(id.clone());
                plan.warnings.push(format!(
                    "session {id} exists in both directories; kept the destination copy"
                ));
            } else {
                plan.carried_sessions.push(id.clone());
            }
        }

        for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other).at(source)?;
            if entry.file_type().is_dir() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(std::io::Error::other)
                .at(entry.path())?
                .to_path_buf();
            if relative == Path::new(SESSIONS_INDEX) {
                continue;
            }

            let session = session_id_of(&relative).filter(|id| source_ids.contains(id));
            if session.is_some_and(|id| dest_ids.contains(&id)) {
                continue;
            }
            if destination.join(&relative).exists() {
                plan.warnings.push(format!(
                    "{} exists in both directories; kept the destination copy",
                    relative.display()
                ));
                continue;
            }
            plan.carried_files.push(relative);
        }

        debug!(
            carried = plan.carried_sessions.len(),
            skipped = plan.skipped_sessions.len(),
            files = plan.carried_files.len(),
            "Planned merge"
        );
        Ok(plan)
    }

    /// Copies the carried files, writes the merged index and removes the
    /// source directory.
    ///
    /// # Errors
    ///
    /// Fails on any copy error or if either index exists but is not valid
    /// JSON. The caller is expected to roll back.
    pub fn apply(plan: &MergePlan) -> Result<()> {
        for relative in &plan.carried_files {
            let from = plan.source.join(relative);
            let to = plan.destination.join(relative);
            copy_recursive(&from, &to).at(&to)?;
        }

        merge_index(&plan.source, &plan.destination, &plan.skipped_sessions)?;

        remove_path(&plan.source).at(&plan.source)?;
        info!(
            source = %plan.source.display(),
            destination = %plan.destination.display(),
            sessions = plan.carried_sessions.len(),
            "Merged project data"
        );
        Ok(())
    }
}

/// Session ids known in a data directory.
fn session_ids(dir: &Path) -> Result<BTreeSet<String>> {
    let mut ids = BTreeSet::new();
    if !dir.is_dir() {
        return Ok(ids);
    }
    if let Some(index) = SessionsIndex::load(dir) {
        ids.extend(index.entries.into_iter().filter_map(|e| e.session_id));
    }
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(TRANSCRIPT_EXTENSION) {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }
    }
    Ok(ids)
}

fn read_index(dir: &Path) -> Result<Option<Value>> {
    let path = dir.join(SESSIONS_INDEX);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).at(&path)?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ClaudepathError::Json { path, source })
}

fn merge_index(source: &Path, destination: &Path, skipped: &[String]) -> Result<()> {
    let Some(source_index) = read_index(source)? else {
        return Ok(());
    };
    let dest_path = destination.join(SESSIONS_INDEX);

    let merged = match read_index(destination)? {
        None => source_index,
        Some(mut dest_index) => {
            let carried: Vec<Value> = entries(&source_index)
                .into_iter()
                .filter(|entry| {
                    entry
                        .get("sessionId")
                        .and_then(Value::as_str)
                        .map_or(true, |id| !skipped.iter().any(|s| s == id))
                })
                .cloned()
                .collect();
            if let Some(obj) = dest_index.as_object_mut() {
                let list = obj
                    .entry("entries")
                    .or_insert_with(|| Value::Array(Vec::new()));
                if let Some(list) = list.as_array_mut() {
                    list.extend(carried);
                }
            }
            dest_index
        }
    };

    let mut text = serde_json::to_string_pretty(&merged).map_err(|source| ClaudepathError::Json {
        path: dest_path.clone(),
        source,
    })?;
    text.push('\n');
    atomic_write(&dest_path, text.as_bytes()).at(&dest_path)
}

fn entries(index: &Value) -> Vec<&Value> {
    index
        .get("entries")
        .and_then(Value::as_array)
        .map(|list| list.iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_project(dir: &Path, sessions: &[&str]) {
        fs::create_dir_all(dir).unwrap();
        let entries: Vec<Value> = sessions
            .iter()
            .map(|id| json!({"sessionId": id, "projectPath": "/p"}))
            .collect();
        fs::write(
            dir.join(SESSIONS_INDEX),
            serde_json::to_string(&json!({"originalPath": "/p", "entries": entries})).unwrap(),
        )
        .unwrap();
        for id in sessions {
            fs::write(dir.join(format!("{id}.jsonl")), format!("{{\"from\":\"{}\"}}\n", dir.display())).unwrap();
        }
    }

    #[test]
    fn test_plan_partitions_sessions() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A", "B"]);
        write_project(&dst, &["B", "C"]);

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();

        assert_eq!(plan.carried_sessions, vec!["A".to_string()]);
        assert_eq!(plan.skipped_sessions, vec!["B".to_string()]);
        assert_eq!(plan.carried_files, vec![PathBuf::from("A.jsonl")]);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn test_apply_merges_index_and_removes_source() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A", "B"]);
        write_project(&dst, &["B", "C"]);
        let dst_b = fs::read_to_string(dst.join("B.jsonl")).unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();
        MergeCoordinator::apply(&plan).unwrap();

        assert!(!src.exists());
        assert!(dst.join("A.jsonl").is_file());
        assert_eq!(fs::read_to_string(dst.join("B.jsonl")).unwrap(), dst_b);

        let index = SessionsIndex::load(&dst).unwrap();
        let ids: Vec<_> = index.entries.into_iter().filter_map(|e| e.session_id).collect();
        assert_eq!(ids, vec!["B", "C", "A"]);
    }

    #[test]
    fn test_session_subdirectories_follow_their_session() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A", "B"]);
        write_project(&dst, &["B"]);
        fs::create_dir_all(src.join("A/subagents")).unwrap();
        fs::write(src.join("A/subagents/agent-1.jsonl"), "{}\n").unwrap();
        fs::create_dir_all(src.join("B/subagents")).unwrap();
        fs::write(src.join("B/subagents/agent-2.jsonl"), "{}\n").unwrap();
        fs::create_dir_all(src.join("memory")).unwrap();
        fs::write(src.join("memory/notes.md"), "x").unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();

        assert!(plan.carried_files.contains(&PathBuf::from("A/subagents/agent-1.jsonl")));
        assert!(!plan.carried_files.contains(&PathBuf::from("B/subagents/agent-2.jsonl")));
        assert!(plan.carried_files.contains(&PathBuf::from("memory/notes.md")));
    }

    #[test]
    fn test_conflicting_plain_files_keep_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &[]);
        write_project(&dst, &[]);
        fs::write(src.join("notes.md"), "source").unwrap();
        fs::write(dst.join("notes.md"), "dest").unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();
        MergeCoordinator::apply(&plan).unwrap();

        assert_eq!(fs::read_to_string(dst.join("notes.md")).unwrap(), "dest");
        assert!(plan.warnings.iter().any(|w| w.contains("notes.md")));
    }

    #[test]
    fn test_carried_session_never_overwrites_destination_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A"]);
        write_project(&dst, &["C"]);
        fs::create_dir_all(src.join("A/subagents")).unwrap();
        fs::write(src.join("A/subagents/agent-1.jsonl"), "source\n").unwrap();
        // A leftover directory for a session the destination does not track.
        fs::create_dir_all(dst.join("A/subagents")).unwrap();
        fs::write(dst.join("A/subagents/agent-1.jsonl"), "dest\n").unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();
        MergeCoordinator::apply(&plan).unwrap();

        assert_eq!(plan.carried_sessions, vec!["A".to_string()]);
        assert!(dst.join("A.jsonl").is_file());
        assert_eq!(
            fs::read_to_string(dst.join("A/subagents/agent-1.jsonl")).unwrap(),
            "dest\n"
        );
        assert!(plan.warnings.iter().any(|w| w.contains("agent-1.jsonl")));
    }

    #[test]
    fn test_source_index_used_when_destination_has_none() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A"]);
        fs::create_dir_all(&dst).unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();
        MergeCoordinator::apply(&plan).unwrap();

        let index = SessionsIndex::load(&dst).unwrap();
        assert_eq!(index.original_path.as_deref(), Some("/p"));
        assert_eq!(index.entries.len(), 1);
    }

    #[test]
    fn test_unparsable_destination_index_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        let dst = tmp.path().join("dst");
        write_project(&src, &["A"]);
        fs::create_dir_all(&dst).unwrap();
        fs::write(dst.join(SESSIONS_INDEX), "{not json").unwrap();

        let plan = MergeCoordinator::plan(&src, &dst).unwrap();
        let err = MergeCoordinator::apply(&plan).unwrap_err();

        assert!(matches!(err, ClaudepathError::Json { .. }));
    }
}
