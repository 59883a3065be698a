//! Normalization of user-supplied project paths.
//!
//! Paths given on the command line may be relative, contain `~`, `.` or `..`,
//! or end in a slash. The engine compares and encodes paths as strings, so
//! they are normalized lexically first. The source of a `remap` usually no
//! longer exists, so nothing here touches the file system.

use std::io;
use std::path::{Component, Path, PathBuf};

use directories::BaseDirs;

/// Makes `path` absolute against `cwd`, expands a leading `~`, and resolves
/// `.` and `..` lexically.
#[must_use]
pub fn normalize_with(path: &Path, cwd: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = if expanded.is_absolute() {
        expanded
    } else {
        cwd.join(expanded)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// [`normalize_with`] against the process working directory.
pub fn normalize(path: &Path) -> io::Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    Ok(normalize_with(path, &cwd))
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match BaseDirs::new() {
        Some(dirs) => dirs.home_dir().join(rest),
        None => path.to_path_buf(),
    }
}

/// Renders a normalized path the way Claude Code records it.
#[must_use]
pub fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
