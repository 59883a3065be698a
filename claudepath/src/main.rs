//! claudepath - move Claude Code projects without losing session history.
//!
//! # Commands
//!
//! - `claudepath list`: List projects tracked by Claude Code
//! - `claudepath mv <old> <new>`: Move a project directory and update Claude data
//! - `claudepath remap <old> <new>`: Update Claude data after a manual move
//! - `claudepath restore [timestamp]`: Restore Claude data from a backup
//!
//! # Environment Variables
//!
//! See the [`config`] module for available configuration options.

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use claudepath::backup::{BackupSnapshot, BackupStore};
use claudepath::config::Config;
use claudepath::error::ClaudepathError;
use claudepath::locator::{ProjectLocator, Resolution};
use claudepath::transaction::{RemapMode, RemapPlan, TargetKind, TransactionManager};
use claudepath::update;
use claudepath::utils::normalize;

/// How long to wait for the update check once the command has finished.
const UPDATE_GRACE: Duration = Duration::from_secs(2);

/// claudepath - move Claude Code projects without losing session history.
///
/// Claude Code stores per-project data under ~/.claude/projects/ keyed by
/// the project's absolute path. claudepath moves or remaps that data when
/// the project directory moves.
#[derive(Parser, Debug)]
#[command(name = "claudepath")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    CLAUDEPATH_CLAUDE_DIR       Claude directory (default: ~/.claude)
    CLAUDEPATH_BACKUP_KEEP      Number of backups to keep (default: all)
    CLAUDEPATH_NO_UPDATE_CHECK  Disable the new-version notice

EXAMPLES:
    # Move a project and update Claude Code references
    claudepath mv ~/old-app ~/new-app

    # Already moved it yourself? Update references only
    claudepath remap ~/old-app ~/new-app

    # Preview without changing anything
    claudepath remap ~/old-app ~/new-app --dry-run

    # Undo the last operation
    claudepath restore
")]
struct Cli {
    /// Claude Code data directory (default: ~/.claude).
    #[arg(long, global = true, value_name = "DIR")]
    claude_dir: Option<PathBuf>,

    /// Show per-file detail and debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// List all projects tracked by Claude Code.
    ///
    /// Projects whose directory no longer exists are marked as orphaned.
    List,

    /// Move a project directory and update all Claude Code references.
    Mv(RemapArgs),

    /// Update Claude Code references after moving a project yourself.
    ///
    /// The new directory must already exist.
    Remap(RemapArgs),

    /// Restore Claude Code data from a backup.
    ///
    /// Restores the latest backup unless a timestamp is given.
    Restore {
        /// Backup to restore, e.g. 20260301_142233.
        timestamp: Option<String>,

        /// List available backups instead of restoring.
        #[arg(long)]
        list: bool,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
}

/// Arguments shared by `mv` and `remap`.
#[derive(Args, Debug)]
struct RemapArgs {
    /// Current (or previous) project path.
    old: PathBuf,

    /// New project path.
    new: PathBuf,

    /// Show what would change without modifying anything.
    #[arg(long)]
    dry_run: bool,

    /// Skip creating a backup. Failures cannot be rolled back.
    #[arg(long)]
    no_backup: bool,

    /// Merge into an existing destination data directory.
    #[arg(long)]
    merge: bool,

    /// Skip the confirmation prompt.
    #[arg(short, long)]
    yes: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments using clap
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(dir) = &cli.claude_dir {
        config.data_root = normalize(dir).context("Failed to resolve --claude-dir")?;
    }
    config.verbose = cli.verbose;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?;

    if let Err(err) = runtime.block_on(run(cli.command, config)) {
        report(&err);
        std::process::exit(1);
    }
    Ok(())
}

/// Runs a command with the update check alongside it.
async fn run(command: Command, config: Config) -> Result<()> {
    let checks_updates = config.update_check && !matches!(command, Command::Restore { .. });
    let update_check = checks_updates.then(|| update::spawn_check(update::DEFAULT_INDEX_URL.to_string()));

    let result = match command {
        Command::List => run_list(&config),
        Command::Mv(args) => run_remap(config, args, RemapMode::Move),
        Command::Remap(args) => run_remap(config, args, RemapMode::Remap),
        Command::Restore {
            timestamp,
            list,
            yes,
        } => run_restore(&config, timestamp.as_deref(), list, yes),
    };

    if let Some(handle) = update_check {
        if result.is_ok() {
            if let Some(latest) = update::await_check(handle, UPDATE_GRACE).await {
                eprintln!();
                eprintln!("{}", update::notice(&latest));
            }
        } else {
            handle.abort();
        }
    }
    result
}

/// Runs the list command.
fn run_list(config: &Config) -> Result<()> {
    let locator = ProjectLocator::new(config);
    let projects = locator.resolve_all()?;

    if projects.is_empty() {
        println!("No Claude Code projects found.");
        return Ok(());
    }

    println!("Claude Code projects in {}/", config.projects_dir().display());
    println!();
    for project in &projects {
        let status = if project.exists_on_disk {
            "✓"
        } else {
            "✗ orphaned"
        };
        match &project.resolution {
            Resolution::Resolved { path, tier } => {
                println!("  {path} {status}");
                if config.verbose {
                    println!("    dir: {}  resolved from: {tier}", project.encoded_name);
                }
            }
            Resolution::Unresolved => {
                println!("  {} (path unknown) {status}", project.encoded_name);
            }
        }
        let modified = project
            .last_modified
            .as_deref()
            .map_or_else(|| "unknown".to_string(), short_timestamp);
        println!(
            "    sessions: {}  last active: {modified}",
            project.session_count
        );
        println!();
    }
    Ok(())
}

/// Runs the mv and remap commands.
fn run_remap(mut config: Config, args: RemapArgs, mode: RemapMode) -> Result<()> {
    config.dry_run = args.dry_run;
    config.backup = !args.no_backup;
    config.merge = args.merge;
    let verbose = config.verbose;

    let mut manager = TransactionManager::new(config);
    let plan = manager.plan_remap(&args.old, &args.new, mode)?;

    if args.dry_run {
        println!("DRY RUN: no files will be modified");
        println!();
    }
    let from_label = match mode {
        RemapMode::Move => "From:",
        RemapMode::Remap => "Old: ",
    };
    println!("  {from_label} {}", plan.old_path);
    println!("  To:   {}", plan.new_path);
    println!();

    if !args.dry_run && !args.yes {
        print_preview(&plan, !args.no_backup);
        let prompt = match mode {
            RemapMode::Move => "Move project and update all Claude Code references?",
            RemapMode::Remap => "Update all Claude Code references to the new path?",
        };
        if !confirm(prompt)? {
            eprintln!("Aborted.");
            return Ok(());
        }
    }

    let summary = manager.execute(&plan)?;
    if !summary.dry_run {
        println!("Done!");
    }
    println!("{summary}");

    if verbose {
        for file in &summary.files {
            println!("    {} ({} change(s))", file.path.display(), file.changes);
        }
    }
    Ok(())
}

fn print_preview(plan: &RemapPlan, backup: bool) {
    let transcripts = plan
        .targets
        .iter()
        .filter(|t| t.kind == TargetKind::Transcript)
        .count();
    let has_history = plan.targets.iter().any(|t| t.kind == TargetKind::History);

    println!("  Will update:");
    if plan.relocate {
        println!("    - Project directory (move)");
    }
    if plan.merge.is_some() {
        println!("    - Claude data directory (merge into existing)");
    } else if plan.renames_data_dir() {
        println!("    - Claude data directory (rename)");
    }
    if transcripts > 0 {
        println!("    - {transcripts} session file(s)");
    }
    if has_history {
        println!("    - history.jsonl");
    }
    if backup {
        println!("    - Backup will be created");
    }
    println!();
}

/// Runs the restore command.
fn run_restore(config: &Config, timestamp: Option<&str>, list: bool, yes: bool) -> Result<()> {
    let store = BackupStore::from_config(config);

    if list {
        let snapshots = store.list().map_err(ClaudepathError::from)?;
        if snapshots.is_empty() {
            println!("No backups found.");
            return Ok(());
        }
        println!("Available backups in {}/", store.root().display());
        println!();
        for snapshot in &snapshots {
            print_snapshot(snapshot);
        }
        return Ok(());
    }

    let snapshot = match timestamp {
        Some(ts) => store.open(ts),
        None => store.latest(),
    }
    .map_err(ClaudepathError::from)?;

    print_snapshot(&snapshot);
    if !yes && !confirm("Restore from this backup?")? {
        eprintln!("Aborted.");
        return Ok(());
    }

    snapshot.restore().map_err(ClaudepathError::from)?;
    println!("Restored successfully from {}", snapshot.timestamp);
    Ok(())
}

fn print_snapshot(snapshot: &BackupSnapshot) {
    println!("  {}", snapshot.timestamp);
    for item in &snapshot.manifest.items {
        let note = if item.existed() { "" } else { " (absent)" };
        println!("    {}{note}", item.original.display());
    }
    println!();
}

/// Asks a yes/no question on stderr.
fn confirm(prompt: &str) -> Result<bool> {
    eprint!("{prompt} [y/N] ");
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let answer = input.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

/// `2026-03-01T14:22:33.000Z` becomes `2026-03-01 14:22`.
fn short_timestamp(ts: &str) -> String {
    if ts.contains('T') {
        ts.chars()
            .take(16)
            .map(|c| if c == 'T' { ' ' } else { c })
            .collect()
    } else {
        ts.to_string()
    }
}

fn report(err: &anyhow::Error) {
    debug!(error = ?err, "Command failed");
    match err.downcast_ref::<ClaudepathError>() {
        Some(e) => eprintln!("Error: {e}"),
        None => eprintln!("Error: {err:#}"),
    }
}

/// Initializes the logging subsystem.
fn init_logging(verbose: bool) {
    let default = if verbose { "claudepath=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_remap_flags_parse() {
        let cli = Cli::parse_from([
            "claudepath",
            "remap",
            "/a",
            "/b",
            "--dry-run",
            "--merge",
            "--claude-dir",
            "/tmp/c",
        ]);
        assert_eq!(cli.claude_dir, Some(PathBuf::from("/tmp/c")));
        match cli.command {
            Command::Remap(args) => {
                assert!(args.dry_run);
                assert!(args.merge);
                assert!(!args.no_backup);
                assert_eq!(args.old, PathBuf::from("/a"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_restore_parses_optional_timestamp() {
        let cli = Cli::parse_from(["claudepath", "restore", "--list"]);
        assert!(matches!(
            cli.command,
            Command::Restore { timestamp: None, list: true, .. }
        ));
    }

    #[test]
    fn test_short_timestamp() {
        assert_eq!(short_timestamp("2026-03-01T14:22:33.000Z"), "2026-03-01 14:22");
        assert_eq!(short_timestamp("2026-03-01 14:22"), "2026-03-01 14:22");
    }
}
