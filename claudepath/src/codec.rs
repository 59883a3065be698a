//! Translation between absolute paths and Claude Code's project directory names.
//!
//! Claude Code stores per-project state under `~/.claude/projects/<encoded>/`,
//! where `<encoded>` is the absolute project path with every `/` replaced by
//! `-`:
//!
//! ```text
//! /Users/alice/my-app  ->  -Users-alice-my-app
//! ```
//!
//! The encoding is lossy: a literal `-` in a directory name and a path
//! separator encode identically. [`decode`] is therefore only a guess; the
//! [`locator`](crate::locator) module recovers the real path.

use std::path::Path;

/// Character substituted for the path separator.
pub const SUBSTITUTE: char = '-';

/// Path separator in absolute paths.
pub const SEPARATOR: char = '/';

/// Encodes an absolute path as a project directory name.
///
/// # Examples
///
/// ```
/// use claudepath::codec::encode;
///
/// assert_eq!(encode("/Users/alice/my-app"), "-Users-alice-my-app");
/// ```
#[must_use]
pub fn encode(absolute_path: &str) -> String {
    absolute_path.replace(SEPARATOR, &SUBSTITUTE.to_string())
}

/// Encodes a [`Path`], converting non-UTF-8 components lossily.
#[must_use]
pub fn encode_path(absolute_path: &Path) -> String {
    encode(&absolute_path.to_string_lossy())
}

/// Naively decodes a project directory name by turning every `-` back into `/`.
///
/// The result is wrong whenever the original path contained a hyphen, so it
/// must never be treated as authoritative.
///
/// # Examples
///
/// ```
/// use claudepath::codec::decode;
///
/// assert_eq!(decode("-Users-alice-app"), "/Users/alice/app");
/// // Ambiguous: the real path may have been /Users/alice/my-app
/// assert_eq!(decode("-Users-alice-my-app"), "/Users/alice/my/app");
/// ```
#[must_use]
pub fn decode(encoded: &str) -> String {
    encoded.replace(SUBSTITUTE, &SEPARATOR.to_string())
}
