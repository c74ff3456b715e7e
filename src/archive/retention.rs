//! Retention eviction, run against one `<group>/<id>` directory after every write.
//!
//! Two independent rules share one pass: keep the newest `max_count` versions,
//! and drop anything older than `max_age_days`. A version failing either rule
//! is deleted. Deletion is best-effort; failures are logged and the pass goes on.

use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::error::{HistoryError, HistoryResult};
use crate::paths::{is_version_file, parse_version_timestamp};

/// Retention thresholds. `None` on either axis means no limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_count: Option<usize>,
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    /// Per-target override on each axis, falling back to the process-wide default.
    pub fn effective(defaults: &RetentionPolicy, overrides: &RetentionPolicy) -> Self {
        Self {
            max_count: overrides.max_count.or(defaults.max_count),
            max_age_days: overrides.max_age_days.or(defaults.max_age_days),
        }
    }

    pub fn is_unbounded(&self) -> bool { self.max_count.is_none() && self.max_age_days.is_none() }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    ExceededMaxCount,
    OlderThanMaxAge,
}

impl EvictionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionReason::ExceededMaxCount => "exceeded max backups limit",
            EvictionReason::OlderThanMaxAge => "older than max backup age",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Decide which version files violate `policy` at time `now`, newest-first order.
///
/// A file name that does not parse as a timestamp is never evicted by age.
pub fn plan_evictions(names: &[String], policy: &RetentionPolicy, now: DateTime<Utc>) -> Vec<(String, EvictionReason)> {
    let mut sorted: Vec<&String> = names.iter().collect();
    sorted.sort_by(|a, b| b.cmp(a));
    // A cutoff before the earliest representable date means nothing is too old.
    let cutoff = policy.max_age_days.and_then(|days| now.checked_sub_signed(Duration::days(i64::from(days))));

    let mut out = Vec::new();
    for (idx, name) in sorted.into_iter().enumerate() {
        if policy.max_count.is_some_and(|max| idx >= max) {
            out.push((name.clone(), EvictionReason::ExceededMaxCount));
            continue;
        }
        if let (Some(cutoff), Some(ts)) = (cutoff, parse_version_timestamp(name)) {
            if ts < cutoff {
                out.push((name.clone(), EvictionReason::OlderThanMaxAge));
            }
        }
    }
    out
}

/// Apply `policy` to the version files in `dir`.
pub fn evict(dir: &Path, policy: &RetentionPolicy, now: DateTime<Utc>) -> HistoryResult<EvictionReport> {
    let mut report = EvictionReport::default();
    if policy.is_unbounded() {
        return Ok(report);
    }
    let entries = fs::read_dir(dir).map_err(|e| HistoryError::io("failed to read archive directory", dir, e))?;
    let names: Vec<String> = entries
        .flatten()
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| is_version_file(n))
        .collect();

    for (name, reason) in plan_evictions(&names, policy, now) {
        let path = dir.join(&name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(target: "confhist::archive", file = %path.display(), reason = reason.as_str(), "Removed old backup");
                report.removed.push(name);
            }
            Err(e) => {
                error!(target: "confhist::archive", file = %path.display(), reason = reason.as_str(), error = %e, "Failed to remove old backup");
                report.failed.push(name);
            }
        }
    }
    Ok(report)
}
