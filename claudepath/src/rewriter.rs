//! Structural rewriting of path references in JSON and JSONL files.
//!
//! Path references are rewritten at the value level, never as raw text, so
//! that `/Users/foo` is never mistaken for a prefix of `/Users/foobar`. A
//! string value is rewritten when it:
//!
//! - equals the old path, or starts with the old path followed by `/`, or
//! - contains `/projects/<encoded old path>` as whole path components (this
//!   is how `fullPath` in `sessions-index.json` follows the renamed data
//!   directory).
//!
//! Object keys, numbers, booleans and null are never touched.
//!
//! # JSONL handling
//!
//! Files are streamed line by line. Each line keeps its position and its
//! terminator. Lines that neither mention the old path nor hold `\/` or `\u`
//! escapes are copied without being parsed, and lines whose rewrite changes
//! nothing are copied byte-for-byte. Lines that are not valid JSON (or not
//! UTF-8) are copied unchanged and reported as [`RewriteWarning`]s.
//!
//! New content is streamed into a sibling temporary file which replaces the
//! original with an atomic rename, and only if at least one line changed.
//!
//! # Example
//!
//! ```
//! use claudepath::rewriter::{JsonAwareRewriter, PathRewrite, RewriteScope, WriteMode};
//!
//! let rewriter = JsonAwareRewriter::new(
//!     PathRewrite::new("/Users/foo", "/Users/foo2"),
//!     WriteMode::DryRun,
//! );
//! let input = r#"{"a":"/Users/foo/file.txt","b":"/Users/foobar/file.txt"}"#;
//! let (output, outcome) = rewriter.rewrite_jsonl_str(input, RewriteScope::Everything);
//!
//! assert_eq!(output, r#"{"a":"/Users/foo2/file.txt","b":"/Users/foobar/file.txt"}"#);
//! assert_eq!(outcome.lines_changed, 1);
//! ```

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Cursor, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::codec;
use crate::error::{IoResultExt, Result};
use crate::types::HistoryEntry;
use crate::utils::fs::{persist, sibling_temp};

/// Whether rewrites are written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Apply,
    /// Count what would change, write nothing.
    DryRun,
}

/// Which lines of a JSONL file are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteScope {
    /// Every line (session transcripts).
    Everything,
    /// Only lines whose `project` field equals the old path exactly
    /// (`history.jsonl`).
    HistoryProject,
}

/// A line or document that was passed through unchanged because it could not
/// be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteWarning {
    pub path: PathBuf,
    /// 1-based line number; `None` for whole JSON documents.
    pub line: Option<usize>,
    pub message: String,
}

impl std::fmt::Display for RewriteWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}:{}: {}", self.path.display(), line, self.message),
            None => write!(f, "{}: {}", self.path.display(), self.message),
        }
    }
}

/// Counts for one rewritten file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileOutcome {
    /// Lines that contained at least one rewritten value (JSONL only).
    pub lines_changed: usize,
    /// String values rewritten.
    pub values_changed: usize,
    pub warnings: Vec<RewriteWarning>,
}

impl FileOutcome {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.values_changed > 0
    }
}

/// An old-to-new path mapping with the matching rules described in the
/// [module docs](self).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    old: String,
    new: String,
    old_projects_component: String,
    new_encoded: String,
    prefilter: bool,
}

impl PathRewrite {
    /// Builds a mapping. Trailing separators are ignored.
    #[must_use]
    pub fn new(old: &str, new: &str) -> Self {
        let old = trim_separator(old).to_string();
        let new = trim_separator(new).to_string();
        let old_encoded = codec::encode(&old);
        let new_encoded = codec::encode(&new);
        // Paths that JSON would escape cannot be found in raw text.
        let prefilter = !old
            .chars()
            .any(|c| c == '"' || c == '\\' || c.is_control());
        Self {
            old_projects_component: format!("/projects/{old_encoded}"),
            old,
            new,
            new_encoded,
            prefilter,
        }
    }

    #[must_use]
    pub fn old(&self) -> &str {
        &self.old
    }

    #[must_use]
    pub fn new_path(&self) -> &str {
        &self.new
    }

    /// The rewritten value, or `None` when `value` does not reference the old
    /// path.
    #[must_use]
    pub fn apply(&self, value: &str) -> Option<String> {
        match self.apply_prefix(value) {
            Some(rewritten) => Some(self.apply_encoded(&rewritten).unwrap_or(rewritten)),
            None => self.apply_encoded(value),
        }
    }

    fn apply_prefix(&self, value: &str) -> Option<String> {
        let rest = value.strip_prefix(self.old.as_str())?;
        if rest.is_empty() || rest.starts_with('/') {
            Some(format!("{}{rest}", self.new))
        } else {
            None
        }
    }

    fn apply_encoded(&self, value: &str) -> Option<String> {
        let needle = self.old_projects_component.as_str();
        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        let mut hit = false;
        for (at, _) in value.match_indices(needle) {
            let end = at + needle.len();
            let boundary = value[end..].chars().next().map_or(true, |c| c == '/');
            if !boundary {
                continue;
            }
            out.push_str(&value[last..at]);
            out.push_str("/projects/");
            out.push_str(&self.new_encoded);
            last = end;
            hit = true;
        }
        if !hit {
            return None;
        }
        out.push_str(&value[last..]);
        Some(out)
    }

    /// Cheap text check used to skip parsing lines that cannot match.
    #[must_use]
    pub fn might_match(&self, raw: &str) -> bool {
        !self.prefilter
            || raw.contains(self.old.as_str())
            || raw.contains(&self.old_projects_component)
            || has_escape(raw)
    }
}

/// `\/` and `\uXXXX` can spell any path character, so such text is parsed.
fn has_escape(raw: &str) -> bool {
    raw.contains("\\/") || raw.contains("\\u")
}

fn trim_separator(path: &str) -> &str {
    if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    }
}

/// Rewrites every string value inside `value` and returns how many changed.
pub fn rewrite_value(value: &mut Value, rewrite: &PathRewrite) -> usize {
    match value {
        Value::String(s) => match rewrite.apply(s) {
            Some(new) => {
                *s = new;
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(|v| rewrite_value(v, rewrite)).sum(),
        Value::Object(map) => map.values_mut().map(|v| rewrite_value(v, rewrite)).sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}

/// Result of rewriting one JSONL line body (without its terminator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Unchanged,
    Rewritten { line: String, values: usize },
    Unparsable(String),
}

/// Rewrites one JSONL line body.
#[must_use]
pub fn rewrite_line(body: &str, rewrite: &PathRewrite, scope: RewriteScope) -> LineOutcome {
    if body.trim().is_empty() || !rewrite.might_match(body) {
        return LineOutcome::Unchanged;
    }
    let mut value: Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(e) => return LineOutcome::Unparsable(e.to_string()),
    };

    if scope == RewriteScope::HistoryProject && !is_history_entry_for(&value, rewrite.old()) {
        return LineOutcome::Unchanged;
    }

    match rewrite_value(&mut value, rewrite) {
        0 => LineOutcome::Unchanged,
        values => match serde_json::to_string(&value) {
            Ok(line) => LineOutcome::Rewritten { line, values },
            Err(e) => LineOutcome::Unparsable(e.to_string()),
        },
    }
}

fn is_history_entry_for(value: &Value, project: &str) -> bool {
    serde_json::from_value::<HistoryEntry>(value.clone())
        .ok()
        .and_then(|entry| entry.project)
        .is_some_and(|p| p == project)
}

/// Rewrites path references in files.
#[derive(Debug, Clone)]
pub struct JsonAwareRewriter {
    rewrite: PathRewrite,
    mode: WriteMode,
}

impl JsonAwareRewriter {
    #[must_use]
    pub fn new(rewrite: PathRewrite, mode: WriteMode) -> Self {
        Self { rewrite, mode }
    }

    #[must_use]
    pub fn path_rewrite(&self) -> &PathRewrite {
        &self.rewrite
    }

    #[must_use]
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    /// Streams `reader` line by line into `writer` (if any).
    ///
    /// `path` only labels warnings.
    pub fn rewrite_stream<R: BufRead, W: Write>(
        &self,
        mut reader: R,
        mut writer: Option<&mut W>,
        scope: RewriteScope,
        path: &Path,
    ) -> io::Result<FileOutcome> {
        let mut outcome = FileOutcome::default();
        let mut buf = Vec::new();
        let mut line_no = 0;

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;

            let (body, terminator) = split_terminator(&buf);
            let replacement = match std::str::from_utf8(body) {
                Ok(text) => match rewrite_line(text, &self.rewrite, scope) {
                    LineOutcome::Unchanged => None,
                    LineOutcome::Rewritten { line, values } => {
                        outcome.lines_changed += 1;
                        outcome.values_changed += values;
                        Some(line)
                    }
                    LineOutcome::Unparsable(message) => {
                        outcome.warnings.push(RewriteWarning {
                            path: path.to_path_buf(),
                            line: Some(line_no),
                            message: format!("not valid JSON, left unchanged: {message}"),
                        });
                        None
                    }
                },
                Err(_) if self.rewrite.might_match(&String::from_utf8_lossy(body)) => {
                    outcome.warnings.push(RewriteWarning {
                        path: path.to_path_buf(),
                        line: Some(line_no),
                        message: "not valid UTF-8, left unchanged".to_string(),
                    });
                    None
                }
                Err(_) => None,
            };

            if let Some(w) = writer.as_deref_mut() {
                match &replacement {
                    Some(line) => {
                        w.write_all(line.as_bytes())?;
                        w.write_all(terminator)?;
                    }
                    None => w.write_all(&buf)?,
                }
            }
        }

        for warning in &outcome.warnings {
            warn!(path = %warning.path.display(), line = ?warning.line, "{}", warning.message);
        }
        Ok(outcome)
    }

    /// Rewrites JSONL content held in memory.
    #[must_use]
    pub fn rewrite_jsonl_str(&self, content: &str, scope: RewriteScope) -> (String, FileOutcome) {
        let mut out: Vec<u8> = Vec::with_capacity(content.len());
        let outcome = self
            .rewrite_stream(Cursor::new(content.as_bytes()), Some(&mut out), scope, Path::new("<memory>"))
            .unwrap_or_default();
        (String::from_utf8_lossy(&out).into_owned(), outcome)
    }

    /// Rewrites a JSONL file in place (or only counts, in dry-run mode).
    ///
    /// A missing file counts as nothing to do.
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be read, or the replacement
    /// cannot be written or renamed into place.
    pub fn rewrite_jsonl_file(&self, path: &Path, scope: RewriteScope) -> Result<FileOutcome> {
        if !path.exists() {
            return Ok(FileOutcome::default());
        }
        let reader = BufReader::new(File::open(path).at(path)?);

        let outcome = match self.mode {
            WriteMode::DryRun => self
                .rewrite_stream::<_, io::Sink>(reader, None, scope, path)
                .at(path)?,
            WriteMode::Apply => {
                let tmp = sibling_temp(path).at(path)?;
                let mut writer = BufWriter::new(tmp);
                let outcome = self
                    .rewrite_stream(reader, Some(&mut writer), scope, path)
                    .at(path)?;
                let tmp = writer.into_inner().map_err(|e| e.into_error()).at(path)?;
                if outcome.changed() {
                    tmp.as_file().sync_all().at(path)?;
                    persist(tmp, path).at(path)?;
                }
                outcome
            }
        };

        if outcome.changed() {
            debug!(path = %path.display(), lines = outcome.lines_changed, "Rewrote transcript");
        }
        Ok(outcome)
    }

    /// Rewrites a whole JSON document held in memory.
    ///
    /// Returns the new text when something changed. Output is pretty-printed
    /// with two-space indentation and keeps a trailing newline if the input
    /// had one.
    #[must_use]
    pub fn rewrite_json_str(&self, content: &str, path: &Path) -> (Option<String>, FileOutcome) {
        let mut outcome = FileOutcome::default();
        if !self.rewrite.might_match(content) {
            return (None, outcome);
        }
        let mut value: Value = match serde_json::from_str(content) {
            Ok(v) => v,
            Err(e) => {
                outcome.warnings.push(RewriteWarning {
                    path: path.to_path_buf(),
                    line: None,
                    message: format!("not valid JSON, left unchanged: {e}"),
                });
                return (None, outcome);
            }
        };

        outcome.values_changed = rewrite_value(&mut value, &self.rewrite);
        if !outcome.changed() {
            return (None, outcome);
        }
        match serde_json::to_string_pretty(&value) {
            Ok(mut text) => {
                if content.ends_with('\n') {
                    text.push('\n');
                }
                (Some(text), outcome)
            }
            Err(e) => {
                outcome.values_changed = 0;
                outcome.warnings.push(RewriteWarning {
                    path: path.to_path_buf(),
                    line: None,
                    message: format!("could not re-serialize, left unchanged: {e}"),
                });
                (None, outcome)
            }
        }
    }

    /// Rewrites a JSON document file (`sessions-index.json`).
    ///
    /// # Errors
    ///
    /// Returns an I/O error when the file cannot be read or replaced.
    pub fn rewrite_json_file(&self, path: &Path) -> Result<FileOutcome> {
        if !path.exists() {
            return Ok(FileOutcome::default());
        }
        let content = fs::read_to_string(path).at(path)?;
        let (rewritten, outcome) = self.rewrite_json_str(&content, path);
        for warning in &outcome.warnings {
            warn!(path = %warning.path.display(), "{}", warning.message);
        }

        if let (Some(text), WriteMode::Apply) = (rewritten, self.mode) {
            crate::utils::fs::atomic_write(path, text.as_bytes()).at(path)?;
            debug!(path = %path.display(), values = outcome.values_changed, "Rewrote index");
        }
        Ok(outcome)
    }
}

fn split_terminator(line: &[u8]) -> (&[u8], &[u8]) {
    if let Some(body) = line.strip_suffix(b"\r\n") {
        (body, &line[body.len()..])
    } else if let Some(body) = line.strip_suffix(b"\n") {
        (body, &line[body.len()..])
    } else {
        (line, &[])
    }
}
