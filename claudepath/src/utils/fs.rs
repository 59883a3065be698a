//! File system helpers shared by the backup, merge and transaction modules.
//!
//! Every helper returns plain [`std::io::Result`]; callers attach the path
//! with [`IoResultExt::at`](crate::error::IoResultExt::at).

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Copies a file or a directory tree from `src` to `dst`.
///
/// `dst` must not exist. File permissions are copied along with contents.
pub fn copy_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    if !src.is_dir() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        return Ok(());
    }

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(io::Error::other)?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    fs::copy(src, dst).map(|_| ())
}

/// Removes a file or directory tree. Missing paths are not an error.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Moves `src` to `dst`, falling back to copy-and-delete only when the two
/// paths are on different file systems.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            if rename_err.kind() != io::ErrorKind::CrossesDevices || dst.exists() {
                return Err(rename_err);
            }
            if let Err(copy_err) = copy_recursive(src, dst) {
                let _ = remove_path(dst);
                return Err(copy_err);
            }
            remove_path(src)
        }
    }
}

/// Collects files under `dir` with the given extension, sorted by path.
pub fn collect_files(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if entry.file_type().is_file()
            && entry.path().extension().and_then(|e| e.to_str()) == Some(extension)
        {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Creates a temporary file next to `path` so that persisting it over `path`
/// is an atomic rename on the same file system.
pub fn sibling_temp(path: &Path) -> io::Result<NamedTempFile> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tempfile::Builder::new()
        .prefix(".claudepath-")
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Atomically replaces `path` with `contents`.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = sibling_temp(path)?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    persist(tmp, path)
}

/// Renames a finished temporary file over `path`.
pub fn persist(tmp: NamedTempFile, path: &Path) -> io::Result<()> {
    if let Ok(meta) = fs::metadata(path) {
        let _ = fs::set_permissions(tmp.path(), meta.permissions());
    }
    tmp.persist(path).map(|_| ()).map_err(|e| e.error)
}

/// Returns a sibling of `path` named `<name><suffix>` that does not exist yet,
/// appending `-1`, `-2`, ... on collision.
#[must_use]
pub fn free_sibling(path: &Path, suffix: &str) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut candidate = path.with_file_name(format!("{name}{suffix}"));
    let mut n = 1;
    while candidate.exists() {
        candidate = path.with_file_name(format!("{name}{suffix}-{n}"));
        n += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_recursive_copies_nested_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(src.join("a/b")).unwrap();
        fs::write(src.join("top.jsonl"), "1\n").unwrap();
        fs::write(src.join("a/b/deep.jsonl"), "2\n").unwrap();

        let dst = tmp.path().join("dst");
        copy_recursive(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("top.jsonl")).unwrap(), "1\n");
        assert_eq!(fs::read_to_string(dst.join("a/b/deep.jsonl")).unwrap(), "2\n");
    }

    #[test]
    fn copy_recursive_copies_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("history.jsonl");
        fs::write(&src, "x\n").unwrap();

        let dst = tmp.path().join("out/history.jsonl");
        copy_recursive(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst).unwrap(), "x\n");
    }

    #[test]
    fn remove_path_ignores_missing() {
        let tmp = tempfile::tempdir().unwrap();
        remove_path(&tmp.path().join("nope")).unwrap();
    }

    #[test]
    fn move_path_renames_within_file_system() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("f"), "x").unwrap();

        let dst = tmp.path().join("moved/app");
        fs::create_dir_all(dst.parent().unwrap()).unwrap();
        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "x");
    }

    #[test]
    fn move_path_into_own_subdirectory_fails_without_copying() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("app");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("f"), "x").unwrap();

        let err = move_path(&src, &src.join("inner")).unwrap_err();

        assert_ne!(err.kind(), io::ErrorKind::CrossesDevices);
        assert!(!src.join("inner").exists());
        assert_eq!(fs::read_to_string(src.join("f")).unwrap(), "x");
    }

    #[test]
    fn collect_files_filters_by_extension_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("s1/subagents")).unwrap();
        fs::write(tmp.path().join("b.jsonl"), "").unwrap();
        fs::write(tmp.path().join("a.jsonl"), "").unwrap();
        fs::write(tmp.path().join("sessions-index.json"), "{}").unwrap();
        fs::write(tmp.path().join("s1/subagents/agent.jsonl"), "").unwrap();

        let files = collect_files(tmp.path(), "jsonl").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(tmp.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.jsonl"),
                PathBuf::from("b.jsonl"),
                PathBuf::from("s1/subagents/agent.jsonl"),
            ]
        );
    }

    #[test]
    fn atomic_write_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("f.json");
        fs::write(&path, "old").unwrap();

        atomic_write(&path, b"new").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
        let leftovers: Vec<_> = fs::read_dir(tmp.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn free_sibling_skips_existing() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("proj");
        fs::create_dir(tmp.path().join("proj.old")).unwrap();

        let side = free_sibling(&target, ".old");
        assert_eq!(side, tmp.path().join("proj.old-1"));
    }

    #[test]
    fn move_path_renames_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("a");
        fs::create_dir(&src).unwrap();
        fs::write(src.join("f"), "x").unwrap();

        let dst = tmp.path().join("b");
        move_path(&src, &dst).unwrap();

        assert!(!src.exists());
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "x");
    }
}
