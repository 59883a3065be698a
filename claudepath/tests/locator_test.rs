//! Integration tests for project discovery against a real directory tree.

use std::fs;
use std::path::{Path, PathBuf};

use claudepath::codec;
use claudepath::config::Config;
use claudepath::locator::{probe, FsOracle, ProjectLocator, Resolution, ResolutionTier};
use claudepath::utils::path_string;
use serde_json::json;
use tempfile::TempDir;

fn setup() -> (TempDir, Config) {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_data_root(tmp.path().join(".claude"));
    fs::create_dir_all(config.projects_dir()).unwrap();
    (tmp, config)
}

fn project_dir(config: &Config, project: &str) -> PathBuf {
    let dir = config.project_data_dir(&codec::encode(project));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn probe_recovers_hyphenated_and_hidden_directories() {
    let tmp = TempDir::new().unwrap();
    let real = tmp.path().join("work/.config/my-cool-app");
    fs::create_dir_all(&real).unwrap();
    fs::create_dir_all(tmp.path().join("work/.config/my")).unwrap();

    let encoded = codec::encode(&path_string(&real));
    assert!(encoded.contains("--config"));

    assert_eq!(probe(&encoded, &FsOracle), Some(real));
}

#[test]
fn index_tier_wins_over_everything() {
    let (tmp, config) = setup();
    let real = path_string(&tmp.path().join("code/app"));
    let dir = project_dir(&config, &real);
    fs::write(
        dir.join("sessions-index.json"),
        json!({"originalPath": "/recorded/elsewhere", "entries": []}).to_string(),
    )
    .unwrap();
    fs::write(dir.join("s.jsonl"), format!("{}\n", json!({"cwd": "/from/cwd"}))).unwrap();

    let locator = ProjectLocator::new(&config);
    let resolution = locator.resolve(&codec::encode(&real));

    assert_eq!(
        resolution,
        Resolution::Resolved {
            path: "/recorded/elsewhere".to_string(),
            tier: ResolutionTier::IndexMetadata,
        }
    );
}

#[test]
fn session_tier_skips_lines_without_cwd() {
    let (tmp, config) = setup();
    let real = path_string(&tmp.path().join("code/app"));
    let dir = project_dir(&config, &real);
    fs::write(
        dir.join("a.jsonl"),
        format!(
            "{}\nnot json\n{}\n{}\n",
            json!({"type": "summary"}),
            json!({"cwd": ""}),
            json!({"cwd": "/from/session"})
        ),
    )
    .unwrap();

    let resolution = ProjectLocator::new(&config).resolve(&codec::encode(&real));

    assert_eq!(resolution.path(), Some("/from/session"));
    assert_eq!(resolution.tier(), Some(ResolutionTier::SessionContent));
}

#[test]
fn probe_tier_used_when_data_has_no_paths() {
    let (tmp, config) = setup();
    let real_dir = tmp.path().join("code/my-app");
    fs::create_dir_all(&real_dir).unwrap();
    let real = path_string(&real_dir);
    project_dir(&config, &real);

    let resolution = ProjectLocator::new(&config).resolve(&codec::encode(&real));

    assert_eq!(resolution.path(), Some(real.as_str()));
    assert_eq!(resolution.tier(), Some(ResolutionTier::FilesystemProbe));
}

#[test]
fn resolve_all_lists_orphans_and_unresolved_projects() {
    let (tmp, config) = setup();

    let live = tmp.path().join("code/live");
    fs::create_dir_all(&live).unwrap();
    let live = path_string(&live);
    let dir = project_dir(&config, &live);
    fs::write(
        dir.join("sessions-index.json"),
        json!({"originalPath": live, "entries": [
            {"sessionId": "1", "modified": "2026-01-01T00:00:00.000Z"},
            {"sessionId": "2", "modified": "2026-02-01T00:00:00.000Z"}
        ]})
        .to_string(),
    )
    .unwrap();

    let gone = path_string(&tmp.path().join("code/gone"));
    let dir = project_dir(&config, &gone);
    fs::write(dir.join("x.jsonl"), format!("{}\n", json!({"cwd": gone}))).unwrap();

    fs::create_dir_all(config.projects_dir().join("-nowhere-at-all-zz")).unwrap();

    let listings = ProjectLocator::new(&config).resolve_all().unwrap();
    assert_eq!(listings.len(), 3);

    let by_name = |name: &str| {
        listings
            .iter()
            .find(|l| l.encoded_name == name)
            .unwrap()
            .clone()
    };

    let live_row = by_name(&codec::encode(&live));
    assert!(live_row.exists_on_disk);
    assert_eq!(live_row.session_count, 2);
    assert_eq!(live_row.last_modified.as_deref(), Some("2026-02-01T00:00:00.000Z"));

    let gone_row = by_name(&codec::encode(&gone));
    assert!(!gone_row.exists_on_disk);
    assert_eq!(gone_row.resolution.path(), Some(gone.as_str()));
    assert_eq!(gone_row.session_count, 1);
    assert!(gone_row.last_modified.is_some());

    let lost = by_name("-nowhere-at-all-zz");
    assert_eq!(lost.resolution, Resolution::Unresolved);
    assert!(!lost.exists_on_disk);
    assert_eq!(lost.session_count, 0);
}

#[test]
fn find_project_dir_falls_back_to_index_scan() {
    let (_tmp, config) = setup();
    let odd = config.projects_dir().join("-renamed-by-hand");
    fs::create_dir_all(&odd).unwrap();
    fs::write(
        odd.join("sessions-index.json"),
        json!({"originalPath": "/Users/alice/app", "entries": []}).to_string(),
    )
    .unwrap();

    let locator = ProjectLocator::new(&config);

    assert_eq!(locator.find_project_dir("/Users/alice/app/"), Some(odd));
    assert_eq!(locator.find_project_dir("/Users/alice/other"), None);
}

#[test]
fn missing_projects_dir_lists_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = Config::with_data_root(tmp.path().join("absent"));
    assert!(ProjectLocator::new(&config).resolve_all().unwrap().is_empty());
    assert!(!Path::new(&config.projects_dir()).exists());
}
