//! Path validation and on-disk naming for the archive tree.
//!
//! Layout: `<archive_root>/<group>/<id>/<YYYYMMDDThhmmss>.yaml` per version and
//! `<archive_root>/<group>/<id>/metadata.json` per item.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::path::{Component, Path, PathBuf};

use crate::error::{HistoryError, HistoryResult};

pub const METADATA_FILE: &str = "metadata.json";
pub const VERSION_EXT: &str = "yaml";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S";

/// Validate one externally supplied group/id/filename component.
///
/// Rejects empty input, absolute paths, drive letters (any `:`), UNC prefixes,
/// any `..` substring, and anything whose cleaned form starts with a separator.
pub fn validate_component(path: &str) -> HistoryResult<()> {
    if path.is_empty() {
        return Err(HistoryError::invalid("path: empty path"));
    }
    if Path::new(path).is_absolute() {
        return Err(HistoryError::invalid("path: absolute paths not allowed"));
    }
    if path.contains(':') || path.starts_with("\\\\") {
        return Err(HistoryError::invalid("path: absolute paths not allowed"));
    }
    if path.contains("..") {
        return Err(HistoryError::invalid("path: contains directory traversal"));
    }
    let cleaned = clean(path);
    if cleaned.starts_with('/') || cleaned.starts_with('\\') {
        return Err(HistoryError::invalid("path: absolute paths not allowed"));
    }
    Ok(())
}

/// Store-level guard: lexically clean, then reject if a `..` component survives.
///
/// Weaker than [`validate_component`]: `configs/../secrets` cleans to `secrets`
/// and passes, and so does `/etc/passwd`. Callers reaching the store from
/// outside must run `validate_component` first.
pub fn sanitize_path(path: &str) -> HistoryResult<()> {
    let cleaned = clean(path);
    if cleaned.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(HistoryError::invalid("path: contains directory traversal"));
    }
    Ok(())
}

/// Lexical normalization: drop `.` segments, fold `seg/..` pairs, keep a leading root.
pub fn clean(path: &str) -> String {
    let normalized = path.replace('\\', "/");
    let rooted = normalized.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in normalized.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if parts.last().is_some_and(|last| *last != "..") {
                    parts.pop();
                } else if !rooted {
                    parts.push("..");
                }
            }
            s => parts.push(s),
        }
    }
    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("/{body}"),
        (false, true) => ".".to_string(),
        (false, false) => body,
    }
}

pub fn entry_dir(archive_root: &Path, group: &str, id: &str) -> PathBuf {
    archive_root.join(group).join(id)
}

pub fn metadata_path(dir: &Path) -> PathBuf { dir.join(METADATA_FILE) }

pub fn version_file_name(captured_at: &DateTime<Utc>) -> String {
    format!("{}.{}", captured_at.format(TIMESTAMP_FORMAT), VERSION_EXT)
}

pub fn is_version_file(name: &str) -> bool {
    Path::new(name).extension().and_then(|e| e.to_str()) == Some(VERSION_EXT)
}

/// Parse the capture time out of a version file name; `None` if the stem is not a timestamp.
pub fn parse_version_timestamp(name: &str) -> Option<DateTime<Utc>> {
    let stem = name.strip_suffix(VERSION_EXT)?.strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stem, TIMESTAMP_FORMAT).ok().map(|ndt| ndt.and_utc())
}

/// Base name of a live file, used as the item id for `single` and `directory` targets.
pub fn base_name(path: &Path) -> Option<String> {
    match path.components().next_back()? {
        Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod paths_tests;
