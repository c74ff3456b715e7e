//! Write an archived version back into the live config.
//!
//! `single` and `directory` blobs replace the live file byte-for-byte.
//! `multiple` blobs hold one element: the live sequence is parsed, the first
//! element with the same identifier is replaced, and the whole sequence is
//! re-serialized. When no element matches, nothing is written.

use serde::Serialize;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::capture::field_text;
use crate::config::{BackupStrategy, BackupType, Target};
use crate::error::{HistoryError, HistoryResult};
use crate::paths::validate_component;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreOutcome {
    Replaced,
    /// `multiple` only: no live element carried the archived identifier.
    NoMatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub path: PathBuf,
    pub backup_type: BackupType,
    pub outcome: RestoreOutcome,
}

/// Overwrite `path` with `blob`.
pub fn restore_entire_file(path: &Path, blob: &[u8]) -> HistoryResult<()> {
    fs::write(path, blob).map_err(|e| HistoryError::io("failed to write restored file", path, e))
}

/// Replace the element of `live` whose `id_field` matches the one in `archived`.
///
/// Returns the new document, or `None` if no element matched.
pub fn merge_element(live: &[u8], archived: &[u8], id_field: &str) -> HistoryResult<Option<String>> {
    let archived: Value =
        serde_yaml::from_slice(archived).map_err(|e| HistoryError::parse("failed to parse backup YAML", e))?;
    let Some(wanted) = field_text(&archived, id_field) else {
        return Err(HistoryError::parse("backup has no identifier", id_field));
    };
    let mut doc: Value =
        serde_yaml::from_slice(live).map_err(|e| HistoryError::parse("failed to parse live YAML", e))?;
    let Value::Sequence(items) = &mut doc else {
        return Err(HistoryError::parse("live file is not a YAML sequence", "not a sequence"));
    };
    let Some(slot) = items.iter_mut().find(|el| field_text(el, id_field).as_deref() == Some(wanted.as_str())) else {
        return Ok(None);
    };
    *slot = archived;
    serde_yaml::to_string(&doc)
        .map(Some)
        .map_err(|e| HistoryError::parse("failed to marshal YAML", e))
}

pub fn restore_partial_file(path: &Path, blob: &[u8], id_field: &str) -> HistoryResult<RestoreOutcome> {
    let live = fs::read(path).map_err(|e| HistoryError::io("failed to read live file", path, e))?;
    match merge_element(&live, blob, id_field)? {
        Some(updated) => {
            restore_entire_file(path, updated.as_bytes())?;
            Ok(RestoreOutcome::Replaced)
        }
        None => Ok(RestoreOutcome::NoMatch),
    }
}

/// Restore `blob`, archived under `id`, into the live copy of `target`.
pub fn restore_version(live_root: &Path, target: &Target, id: &str, blob: &[u8]) -> HistoryResult<RestoreReport> {
    let live = target.live_path(live_root);
    let (path, outcome) = match &target.strategy {
        BackupStrategy::Single => {
            restore_entire_file(&live, blob)?;
            (live, RestoreOutcome::Replaced)
        }
        BackupStrategy::Directory => {
            validate_component(id)?;
            let path = live.join(id);
            restore_entire_file(&path, blob)?;
            (path, RestoreOutcome::Replaced)
        }
        BackupStrategy::Multiple { id_field, .. } => {
            let outcome = restore_partial_file(&live, blob, id_field)?;
            (live, outcome)
        }
    };
    match outcome {
        RestoreOutcome::Replaced => info!(target: "confhist::restore", file = %path.display(), id = id, "Config restored"),
        RestoreOutcome::NoMatch => {
            warn!(target: "confhist::restore", file = %path.display(), id = id, "No live element matches the backup identifier; file left unchanged")
        }
    }
    Ok(RestoreReport { path, backup_type: target.strategy.backup_type(), outcome })
}
