//!
//! confhist capture
//! ----------------
//! Turns live config files into capture jobs. Reading is strategy-dependent:
//!
//! - `single`: the whole file is one item, id = file base name.
//! - `directory`: each file in the directory is one item, id = file base name.
//! - `multiple`: the file is a top-level YAML sequence; each element becomes its
//!   own item, keyed by the configured identifier field.
//!
//! `single` and `directory` blobs are stored byte-for-byte as read (the YAML is
//! only parsed to reject malformed content). `multiple` elements are
//! re-serialized one per document.

use chrono::{DateTime, SubsecRound, Utc};
use serde_yaml::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::config::{BackupStrategy, Target};
use crate::error::{HistoryError, HistoryResult};
use crate::paths::base_name;

pub mod worker;

pub use worker::{CaptureWorker, JobSender, JobState, QueueItem};

/// One snapshot read from the live config, not yet archived.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedVersion {
    pub group: String,
    pub id: String,
    pub display_name: String,
    pub content: Vec<u8>,
    pub captured_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub target: Arc<Target>,
    pub version: CapturedVersion,
}

/// Capture timestamps have second precision; file names depend on it.
pub fn capture_time() -> DateTime<Utc> { Utc::now().trunc_subsecs(0) }

/// Text of a scalar YAML value; `None` for mappings, sequences, and null.
pub fn scalar_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(t) => scalar_text(&t.value),
        _ => None,
    }
}

/// Scalar text of `field` on a mapping element.
pub fn field_text(element: &Value, field: &str) -> Option<String> {
    element.get(field).and_then(scalar_text)
}

fn read_live(path: &Path) -> HistoryResult<Vec<u8>> {
    fs::read(path).map_err(|e| HistoryError::io("failed to read live config", path, e))
}

fn parse_yaml(path: &Path, bytes: &[u8]) -> HistoryResult<Value> {
    let name = base_name(path).unwrap_or_default();
    serde_yaml::from_slice(bytes).map_err(|e| HistoryError::parse(format!("failed to parse YAML in {name}"), e))
}

fn read_whole_file(path: &Path, target: &Target, display_name: String, now: DateTime<Utc>) -> HistoryResult<CapturedVersion> {
    let content = read_live(path)?;
    if let Value::Sequence(_) = parse_yaml(path, &content)? {
        return Err(HistoryError::parse("did not expect a YAML sequence at root", "sequence"));
    }
    let id = base_name(path).ok_or_else(|| HistoryError::invalid("live file name"))?;
    Ok(CapturedVersion { group: target.group.clone(), id, display_name, content, captured_at: now })
}

/// `single`: the whole file at `path`.
pub fn read_single(path: &Path, target: &Target, now: DateTime<Utc>) -> HistoryResult<CapturedVersion> {
    read_whole_file(path, target, target.name.clone(), now)
}

/// `directory`: one file inside the target's directory.
pub fn read_directory_file(path: &Path, target: &Target, now: DateTime<Utc>) -> HistoryResult<CapturedVersion> {
    let name = base_name(path).ok_or_else(|| HistoryError::invalid("live file name"))?;
    read_whole_file(path, target, name, now)
}

/// `multiple`: every element of the top-level sequence at `path`.
pub fn read_multiple(path: &Path, target: &Target, now: DateTime<Utc>) -> HistoryResult<Vec<CapturedVersion>> {
    let BackupStrategy::Multiple { id_field, label_field } = &target.strategy else {
        return Err(HistoryError::invalid("strategy for multi-item read"));
    };
    let bytes = read_live(path)?;
    let Value::Sequence(items) = parse_yaml(path, &bytes)? else {
        return Err(HistoryError::parse("expected a YAML sequence at root", "not a sequence"));
    };
    let mut out = Vec::with_capacity(items.len());
    for (idx, element) in items.iter().enumerate() {
        let Some(id) = field_text(element, id_field) else {
            warn!(target: "confhist::capture", file = %path.display(), index = idx, field = %id_field, "Skipping element without identifier");
            continue;
        };
        let display_name = field_text(element, label_field).unwrap_or_else(|| id.clone());
        let content = serde_yaml::to_string(element)
            .map_err(|e| HistoryError::parse("failed to serialize YAML element", e))?
            .into_bytes();
        out.push(CapturedVersion { group: target.group.clone(), id, display_name, content, captured_at: now });
    }
    Ok(out)
}

fn into_jobs(target: &Arc<Target>, versions: Vec<CapturedVersion>) -> Vec<CaptureJob> {
    versions.into_iter().map(|version| CaptureJob { target: Arc::clone(target), version }).collect()
}

/// Jobs for one changed live path already resolved to `target`.
pub fn jobs_for_path(path: &Path, target: &Arc<Target>) -> HistoryResult<Vec<CaptureJob>> {
    let now = capture_time();
    let versions = match &target.strategy {
        BackupStrategy::Single => vec![read_single(path, target, now)?],
        BackupStrategy::Directory => vec![read_directory_file(path, target, now)?],
        BackupStrategy::Multiple { .. } => read_multiple(path, target, now)?,
    };
    Ok(into_jobs(target, versions))
}

/// Jobs for every item of `target`, as used by capture-all.
///
/// For `directory` targets a file that fails to read or parse is logged and
/// skipped; the rest of the directory is still captured.
pub fn jobs_for_target(live_root: &Path, target: &Arc<Target>) -> HistoryResult<Vec<CaptureJob>> {
    let path = target.live_path(live_root);
    match &target.strategy {
        BackupStrategy::Single | BackupStrategy::Multiple { .. } => jobs_for_path(&path, target),
        BackupStrategy::Directory => {
            let now = capture_time();
            let mut files: Vec<_> = fs::read_dir(&path)
                .map_err(|e| HistoryError::io("failed to read directory", &path, e))?
                .flatten()
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .collect();
            files.sort();
            let mut versions = Vec::with_capacity(files.len());
            for file in files {
                match read_directory_file(&file, target, now) {
                    Ok(v) => versions.push(v),
                    Err(e) => warn!(target: "confhist::capture", file = %file.display(), error = %e, "Skipping unreadable file in directory target"),
                }
            }
            Ok(into_jobs(target, versions))
        }
    }
}

#[cfg(test)]
#[path = "capture_tests.rs"]
mod capture_tests;
