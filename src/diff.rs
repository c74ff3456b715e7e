//! Line diff between two archived versions.

use serde::Serialize;
use similar::{ChangeTag, TextDiff};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionDiff {
    pub left: String,
    pub right: String,
    pub added: usize,
    pub removed: usize,
    /// Unified diff with three lines of context; empty when both sides match.
    pub unified: String,
}

impl VersionDiff {
    pub fn is_identical(&self) -> bool { self.added == 0 && self.removed == 0 }
}

pub fn diff_versions(left_name: &str, left: &[u8], right_name: &str, right: &[u8]) -> VersionDiff {
    let old = String::from_utf8_lossy(left);
    let new = String::from_utf8_lossy(right);
    let diff = TextDiff::from_lines(old.as_ref(), new.as_ref());
    let (mut added, mut removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    let unified = if added == 0 && removed == 0 {
        String::new()
    } else {
        diff.unified_diff().context_radius(3).header(left_name, right_name).to_string()
    };
    VersionDiff { left: left_name.to_string(), right: right_name.to_string(), added, removed, unified }
}
