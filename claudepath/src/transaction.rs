//! The remap transaction: validate, snapshot, mutate, and roll back on
//! failure.
//!
//! A remap moves through these states:
//!
//! ```text
//! Planning ──backup ok──▶ BackedUp ──▶ Mutating ──ok──▶ Committed
//!     │                                    │
//!     └──backup failed──▶ Failed           └──error──▶ RolledBack
//! ```
//!
//! Mutation renames (or merges) the project data directory and then rewrites
//! every path reference: the sessions index, every transcript, and matching
//! lines of `history.jsonl`. In `mv` mode the real project directory is moved
//! first. If anything fails after the snapshot, the snapshot is restored and
//! the real directory moved back, so the data root ends up exactly as it
//! started.
//!
//! A dry run performs the same validation and a read-only simulation, and
//! reports a summary of the same shape without writing anything.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::backup::{BackupError, BackupItem, BackupSnapshot, BackupStore};
use crate::codec;
use crate::config::Config;
use crate::error::{ClaudepathError, IoResultExt, PreconditionError, Result};
use crate::locator::ProjectLocator;
use crate::merge::{MergeCoordinator, MergePlan};
use crate::rewriter::{JsonAwareRewriter, PathRewrite, RewriteScope, RewriteWarning, WriteMode};
use crate::types::{SESSIONS_INDEX, TRANSCRIPT_EXTENSION};
use crate::utils::fs::{collect_files, move_path};
use crate::utils::{normalize, path_string};

/// `remap` updates data after a manual move; `mv` performs the move too.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemapMode {
    Remap,
    Move,
}

/// Lifecycle of a [`TransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Planning,
    BackedUp,
    Mutating,
    Committed,
    RolledBack,
    Failed,
}

/// What kind of file a rewrite target is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TargetKind {
    SessionsIndex,
    Transcript,
    History,
}

impl TargetKind {
    fn scope(self) -> RewriteScope {
        match self {
            Self::History => RewriteScope::HistoryProject,
            Self::SessionsIndex | Self::Transcript => RewriteScope::Everything,
        }
    }
}

/// A file whose path references will be rewritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTarget {
    pub kind: TargetKind,
    /// Where the file is before mutation; read by dry runs.
    pub location: PathBuf,
    /// Where the file is after the data directory moved; written by real runs.
    pub final_location: PathBuf,
}

/// A validated remap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemapPlan {
    pub mode: RemapMode,
    pub old_path: String,
    pub new_path: String,
    pub old_encoded: String,
    pub new_encoded: String,
    /// Data directory for the old path. Usually `projects/<old_encoded>`, but
    /// found through the sessions index when the name diverged.
    pub source_dir: PathBuf,
    /// Data directory for the new path.
    pub destination_dir: PathBuf,
    pub history_path: PathBuf,
    /// Set when the destination data directory exists and will be merged.
    pub merge: Option<MergePlan>,
    /// Whether the real project directory is moved (`mv`).
    pub relocate: bool,
    /// The real destination existed as an empty directory before the move.
    pub replaces_empty_dir: bool,
    pub targets: Vec<RewriteTarget>,
}

impl RemapPlan {
    /// Whether the data directory changes name. Distinct paths can encode to
    /// the same name (`/a-b` and `/a/b`).
    #[must_use]
    pub fn renames_data_dir(&self) -> bool {
        self.source_dir != self.destination_dir
    }
}

/// Per-file result in a [`ChangeSummary`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: PathBuf,
    pub kind: TargetKind,
    /// Changed lines for JSONL files, changed values for the index.
    pub changes: usize,
}

/// Everything a remap changed, or would change in a dry run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSummary {
    pub dry_run: bool,
    pub old_path: String,
    pub new_path: String,
    pub directory_moved: bool,
    pub data_dir_renamed: bool,
    pub data_dir_merged: bool,
    pub sessions_merged: usize,
    pub skipped_sessions: Vec<String>,
    /// Only files with at least one change.
    pub files: Vec<FileChange>,
    pub history_lines_changed: usize,
    pub rewrite_warnings: Vec<RewriteWarning>,
    pub merge_warnings: Vec<String>,
    pub backup: Option<PathBuf>,
}

impl ChangeSummary {
    fn for_plan(plan: &RemapPlan, dry_run: bool) -> Self {
        let (sessions_merged, skipped_sessions, merge_warnings) = match &plan.merge {
            Some(m) => (
                m.carried_sessions.len(),
                m.skipped_sessions.clone(),
                m.warnings.clone(),
            ),
            None => (0, Vec::new(), Vec::new()),
        };
        Self {
            dry_run,
            old_path: plan.old_path.clone(),
            new_path: plan.new_path.clone(),
            directory_moved: plan.relocate,
            data_dir_renamed: plan.merge.is_none() && plan.renames_data_dir(),
            data_dir_merged: plan.merge.is_some(),
            sessions_merged,
            skipped_sessions,
            merge_warnings,
            ..Self::default()
        }
    }

    /// Number of changed transcript files.
    #[must_use]
    pub fn transcripts_changed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.kind == TargetKind::Transcript)
            .count()
    }

    /// Total changed transcript lines.
    #[must_use]
    pub fn transcript_lines_changed(&self) -> usize {
        self.files
            .iter()
            .filter(|f| f.kind == TargetKind::Transcript)
            .map(|f| f.changes)
            .sum()
    }

    #[must_use]
    pub fn index_changed(&self) -> bool {
        self.files.iter().any(|f| f.kind == TargetKind::SessionsIndex)
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        let say = |done: &'static str, todo: &'static str| if self.dry_run { todo } else { done };

        writeln!(f, "{prefix}{} -> {}", self.old_path, self.new_path)?;
        if self.directory_moved {
            writeln!(f, "  {} project directory", say("Moved", "Would move"))?;
        }
        if self.data_dir_merged {
            writeln!(
                f,
                "  {} Claude data into existing directory ({} session(s) merged, {} skipped)",
                say("Merged", "Would merge"),
                self.sessions_merged,
                self.skipped_sessions.len()
            )?;
        } else if self.data_dir_renamed {
            writeln!(f, "  {} Claude data directory", say("Renamed", "Would rename"))?;
        }
        if self.index_changed() {
            writeln!(f, "  {} {SESSIONS_INDEX}", say("Updated", "Would update"))?;
        }
        writeln!(
            f,
            "  {} {} transcript file(s), {} line(s)",
            say("Updated", "Would update"),
            self.transcripts_changed(),
            self.transcript_lines_changed()
        )?;
        writeln!(
            f,
            "  {} {} history line(s)",
            say("Updated", "Would update"),
            self.history_lines_changed
        )?;
        for id in &self.skipped_sessions {
            writeln!(f, "  Skipped session {id} (already present at destination)")?;
        }
        for warning in &self.merge_warnings {
            writeln!(f, "  Warning: {warning}")?;
        }
        for warning in &self.rewrite_warnings {
            writeln!(f, "  Warning: {warning}")?;
        }
        if let Some(backup) = &self.backup {
            writeln!(f, "  Backup: {}", backup.display())?;
        }
        if self.dry_run {
            write!(f, "No changes made. Run without --dry-run to apply.")?;
        }
        Ok(())
    }
}

/// Runs remaps against one data root.
#[derive(Debug)]
pub struct TransactionManager {
    config: Config,
    store: BackupStore,
    state: TxState,
}

impl TransactionManager {
    #[must_use]
    pub fn new(config: Config) -> Self {
        let store = BackupStore::from_config(&config);
        Self {
            config,
            store,
            state: TxState::Planning,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn state(&self) -> TxState {
        self.state
    }

    /// Validates a remap of `old` to `new` and lists every file it will
    /// touch. Nothing is modified.
    ///
    /// # Errors
    ///
    /// Returns [`PreconditionError`]s for invalid requests, or an I/O error
    /// if the data directories cannot be read.
    pub fn plan_remap(&self, old: &Path, new: &Path, mode: RemapMode) -> Result<RemapPlan> {
        let old_dir = normalize(old).at(old)?;
        let new_dir = normalize(new).at(new)?;
        let old_path = path_string(&old_dir);
        let new_path = path_string(&new_dir);

        if old_path == new_path {
            return Err(PreconditionError::SamePath(old_path).into());
        }

        let old_encoded = codec::encode_path(&old_dir);
        let new_encoded = codec::encode_path(&new_dir);
        let Some(source_dir) = ProjectLocator::new(&self.config).find_project_dir(&old_path) else {
            return Err(PreconditionError::SourceNotFound(old_path).into());
        };
        let destination_dir = self.config.project_data_dir(&new_encoded);

        let mut replaces_empty_dir = false;
        match mode {
            RemapMode::Remap => {
                if !new_dir.is_dir() {
                    return Err(PreconditionError::DestinationMissing(new_path).into());
                }
            }
            RemapMode::Move => {
                if !old_dir.exists() {
                    return Err(PreconditionError::SourceMissing(old_path).into());
                }
                if new_dir.starts_with(&old_dir) {
                    return Err(PreconditionError::DestinationInsideSource {
                        old: old_path,
                        new: new_path,
                    }
                    .into());
                }
                if new_dir.exists() {
                    if !is_empty_dir(&new_dir) {
                        return Err(PreconditionError::DestinationNotEmpty(new_path).into());
                    }
                    replaces_empty_dir = true;
                }
            }
        }

        let merge = if source_dir != destination_dir && destination_dir.exists() {
            if !self.config.merge {
                return Err(PreconditionError::DestinationExists(destination_dir).into());
            }
            Some(MergeCoordinator::plan(&source_dir, &destination_dir)?)
        } else {
            None
        };

        let mut targets = data_targets(&source_dir, &destination_dir, merge.as_ref())?;
        let history_path = self.config.history_path();
        if history_path.exists() {
            targets.push(RewriteTarget {
                kind: TargetKind::History,
                location: history_path.clone(),
                final_location: history_path.clone(),
            });
        }

        debug!(
            old = %old_path,
            new = %new_path,
            targets = targets.len(),
            merge = merge.is_some(),
            "Planned remap"
        );

        Ok(RemapPlan {
            mode,
            old_path,
            new_path,
            old_encoded,
            new_encoded,
            source_dir,
            destination_dir,
            history_path,
            merge,
            relocate: mode == RemapMode::Move,
            replaces_empty_dir,
            targets,
        })
    }

    /// Plans and executes in one step.
    ///
    /// # Errors
    ///
    /// See [`plan_remap`](Self::plan_remap) and [`execute`](Self::execute).
    pub fn remap(&mut self, old: &Path, new: &Path, mode: RemapMode) -> Result<ChangeSummary> {
        let plan = self.plan_remap(old, new, mode)?;
        self.execute(&plan)
    }

    /// Executes a plan, or simulates it when the configuration says dry run.
    ///
    /// # Errors
    ///
    /// - [`ClaudepathError::Backup`] if the snapshot could not be taken
    ///   (nothing was modified).
    /// - [`ClaudepathError::RolledBack`] if mutation failed and the snapshot
    ///   was restored.
    /// - [`ClaudepathError::NotRolledBack`] if mutation failed with backups
    ///   disabled.
    /// - [`ClaudepathError::FatalInconsistency`] if mutation failed and so did
    ///   the restore.
    pub fn execute(&mut self, plan: &RemapPlan) -> Result<ChangeSummary> {
        self.state = TxState::Planning;
        if plan.merge.is_none() && plan.renames_data_dir() && plan.destination_dir.exists() {
            return Err(PreconditionError::DestinationExists(plan.destination_dir.clone()).into());
        }
        if self.config.dry_run {
            return self.simulate(plan);
        }

        let snapshot = if self.config.backup {
            match self.store.snapshot(&backup_items(plan)) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    self.state = TxState::Failed;
                    error!(error = %e, "Backup failed, nothing was changed");
                    return Err(e.into());
                }
            }
        } else {
            warn!("Backups disabled, a failure cannot be rolled back");
            None
        };
        self.state = TxState::BackedUp;

        self.state = TxState::Mutating;
        let mut moved = false;
        match self.mutate(plan, &mut moved) {
            Ok(mut summary) => {
                self.state = TxState::Committed;
                summary.backup = snapshot.map(|s| s.path);
                self.prune();
                info!(old = %plan.old_path, new = %plan.new_path, "Remap committed");
                Ok(summary)
            }
            Err(cause) => Err(self.roll_back(plan, cause, snapshot, moved)),
        }
    }

    fn simulate(&self, plan: &RemapPlan) -> Result<ChangeSummary> {
        let rewriter = rewriter_for(plan, WriteMode::DryRun);
        let mut summary = ChangeSummary::for_plan(plan, true);
        rewrite_targets(plan, &rewriter, &mut summary)?;
        Ok(summary)
    }

    fn mutate(&self, plan: &RemapPlan, moved: &mut bool) -> Result<ChangeSummary> {
        if plan.relocate {
            let from = Path::new(&plan.old_path);
            let to = Path::new(&plan.new_path);
            if plan.replaces_empty_dir {
                fs::remove_dir(to).at(to)?;
            }
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            if let Err(e) = move_path(from, to) {
                // A cross-device copy can be complete even if removing the
                // source failed.
                *moved = to.exists();
                return Err(ClaudepathError::Io {
                    path: to.to_path_buf(),
                    source: e,
                });
            }
            *moved = true;
            info!(from = %from.display(), to = %to.display(), "Moved project directory");
        }

        if let Some(merge) = &plan.merge {
            MergeCoordinator::apply(merge)?;
        } else if plan.renames_data_dir() {
            move_path(&plan.source_dir, &plan.destination_dir).at(&plan.destination_dir)?;
            debug!(
                from = %plan.source_dir.display(),
                to = %plan.destination_dir.display(),
                "Renamed data directory"
            );
        }

        let rewriter = rewriter_for(plan, WriteMode::Apply);
        let mut summary = ChangeSummary::for_plan(plan, false);
        rewrite_targets(plan, &rewriter, &mut summary)?;
        Ok(summary)
    }

    fn roll_back(
        &mut self,
        plan: &RemapPlan,
        cause: ClaudepathError,
        snapshot: Option<BackupSnapshot>,
        moved: bool,
    ) -> ClaudepathError {
        error!(error = %cause, "Remap failed, rolling back");
        let cause = Box::new(cause);

        let Some(snapshot) = snapshot else {
            self.state = TxState::Failed;
            if moved {
                if let Err(e) = move_back(plan) {
                    warn!(error = %e, "Could not move project directory back");
                }
            }
            return ClaudepathError::NotRolledBack { cause };
        };

        let restored = snapshot.restore().and_then(|()| {
            if moved {
                move_back(plan)
            } else {
                Ok(())
            }
        });

        match restored {
            Ok(()) => {
                self.state = TxState::RolledBack;
                info!(backup = %snapshot.path.display(), "Rolled back");
                ClaudepathError::RolledBack {
                    cause,
                    snapshot: snapshot.path,
                }
            }
            Err(rollback) => {
                self.state = TxState::Failed;
                let target = rollback
                    .target()
                    .map_or_else(|| snapshot.path.clone(), Path::to_path_buf);
                let side = rollback.side().map(Path::to_path_buf);
                error!(error = %rollback, target = %target.display(), "Rollback failed");
                ClaudepathError::FatalInconsistency {
                    cause,
                    rollback,
                    target,
                    side,
                    snapshot: snapshot.path,
                }
            }
        }
    }

    fn prune(&self) {
        let Some(keep) = self.config.backup_keep else {
            return;
        };
        match self.store.prune(keep) {
            Ok(removed) if !removed.is_empty() => {
                debug!(removed = removed.len(), keep, "Pruned old backups");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to prune old backups"),
        }
    }
}

fn move_back(plan: &RemapPlan) -> std::result::Result<(), BackupError> {
    let from = Path::new(&plan.new_path);
    let to = Path::new(&plan.old_path);
    move_path(from, to).map_err(|source| BackupError::Inconsistent {
        target: to.to_path_buf(),
        side: Some(from.to_path_buf()),
        source,
    })?;
    if plan.replaces_empty_dir {
        if let Err(e) = fs::create_dir(from) {
            warn!(path = %from.display(), error = %e, "Failed to recreate empty destination directory");
        }
    }
    Ok(())
}

fn rewriter_for(plan: &RemapPlan, mode: WriteMode) -> JsonAwareRewriter {
    JsonAwareRewriter::new(PathRewrite::new(&plan.old_path, &plan.new_path), mode)
}

fn rewrite_targets(
    plan: &RemapPlan,
    rewriter: &JsonAwareRewriter,
    summary: &mut ChangeSummary,
) -> Result<()> {
    for target in &plan.targets {
        let path = match rewriter.mode() {
            WriteMode::DryRun => &target.location,
            WriteMode::Apply => &target.final_location,
        };
        let mut outcome = match target.kind {
            TargetKind::SessionsIndex => rewriter.rewrite_json_file(path)?,
            TargetKind::Transcript | TargetKind::History => {
                rewriter.rewrite_jsonl_file(path, target.kind.scope())?
            }
        };
        for warning in &mut outcome.warnings {
            warning.path.clone_from(&target.final_location);
        }
        summary.rewrite_warnings.append(&mut outcome.warnings);

        if !outcome.changed() {
            continue;
        }
        let changes = match target.kind {
            TargetKind::SessionsIndex => outcome.values_changed,
            TargetKind::Transcript | TargetKind::History => outcome.lines_changed,
        };
        if target.kind == TargetKind::History {
            summary.history_lines_changed += changes;
        }
        summary.files.push(FileChange {
            path: target.final_location.clone(),
            kind: target.kind,
            changes,
        });
    }
    Ok(())
}

fn backup_items(plan: &RemapPlan) -> Vec<BackupItem> {
    let mut items = vec![BackupItem::new(data_label(&plan.source_dir), &plan.source_dir)];
    if plan.renames_data_dir() {
        items.push(BackupItem::new(
            data_label(&plan.destination_dir),
            &plan.destination_dir,
        ));
    }
    items.push(BackupItem::new("history.jsonl", &plan.history_path));
    items
}

fn data_label(dir: &Path) -> String {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("projects/{name}")
}

/// Index first, then transcripts in path order.
fn data_targets(
    source: &Path,
    destination: &Path,
    merge: Option<&MergePlan>,
) -> Result<Vec<RewriteTarget>> {
    let mut targets = Vec::new();
    let dest_index = destination.join(SESSIONS_INDEX);

    let index_location = match merge {
        Some(_) if dest_index.exists() => Some(dest_index.clone()),
        _ => Some(source.join(SESSIONS_INDEX)).filter(|p| p.exists()),
    };
    if let Some(location) = index_location {
        targets.push(RewriteTarget {
            kind: TargetKind::SessionsIndex,
            location,
            final_location: dest_index,
        });
    }

    let mut transcripts = Vec::new();
    match merge {
        None => {
            for file in collect_files(source, TRANSCRIPT_EXTENSION).at(source)? {
                let final_location = relocated(&file, source, destination);
                transcripts.push(RewriteTarget {
                    kind: TargetKind::Transcript,
                    location: file,
                    final_location,
                });
            }
        }
        Some(merge) => {
            for file in collect_files(destination, TRANSCRIPT_EXTENSION).at(destination)? {
                transcripts.push(RewriteTarget {
                    kind: TargetKind::Transcript,
                    location: file.clone(),
                    final_location: file,
                });
            }
            for relative in &merge.carried_files {
                if relative.extension().and_then(|e| e.to_str()) != Some(TRANSCRIPT_EXTENSION) {
                    continue;
                }
                transcripts.push(RewriteTarget {
                    kind: TargetKind::Transcript,
                    location: source.join(relative),
                    final_location: destination.join(relative),
                });
            }
        }
    }
    transcripts.sort_by(|a, b| a.final_location.cmp(&b.final_location));
    targets.extend(transcripts);
    Ok(targets)
}

fn relocated(file: &Path, from: &Path, to: &Path) -> PathBuf {
    file.strip_prefix(from)
        .map_or_else(|_| file.to_path_buf(), |relative| to.join(relative))
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}
