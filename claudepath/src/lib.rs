//! claudepath - move Claude Code projects without losing session history.
//!
//! Claude Code keys its per-project data under `~/.claude/projects/` by an
//! encoding of the project's absolute path, and records that path inside
//! session transcripts, the sessions index and the global prompt history.
//! When a project directory moves, that data is orphaned. This crate remaps
//! it to the new path.
//!
//! # Overview
//!
//! A remap renames the encoded data directory (or merges it into an existing
//! one) and rewrites every path reference structurally, inside one
//! transaction that snapshots everything it touches first and restores the
//! snapshot if any step fails.
//!
//! # Modules
//!
//! - [`codec`]: Lossy path to directory-name encoding
//! - [`locator`]: Recovery of the real path behind an encoded name
//! - [`rewriter`]: Structural JSON/JSONL path rewriting
//! - [`backup`]: Timestamped snapshots and rename-aside restore
//! - [`merge`]: Merging into an existing destination data directory
//! - [`transaction`]: The remap state machine
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types for claudepath operations
//! - [`types`]: Claude Code on-disk record types
//! - [`update`]: Background check for newer releases
//! - [`utils`]: File system and path helpers

pub mod backup;
pub mod codec;
pub mod config;
pub mod error;
pub mod locator;
pub mod merge;
pub mod rewriter;
pub mod transaction;
pub mod types;
pub mod update;
pub mod utils;

pub use backup::{BackupError, BackupSnapshot, BackupStore};
pub use config::Config;
pub use error::{ClaudepathError, PreconditionError, Result};
pub use locator::{ProjectListing, ProjectLocator, Resolution, ResolutionTier};
pub use merge::{MergeCoordinator, MergePlan};
pub use rewriter::{JsonAwareRewriter, PathRewrite, RewriteWarning};
pub use transaction::{ChangeSummary, RemapMode, RemapPlan, TransactionManager, TxState};
