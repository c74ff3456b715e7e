use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::BackupType;

/// Identity of one archived item: `<archive_root>/<group>/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConfigKey {
    pub group: String,
    pub id: String,
}

impl ConfigKey {
    pub fn new(group: impl Into<String>, id: impl Into<String>) -> Self {
        Self { group: group.into(), id: id.into() }
    }
}

/// Contents of the `metadata.json` sidecar. Derived from the directory; never hand-edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveMetadata {
    pub display_name: String,
    pub backup_type: BackupType,
    pub backup_count: usize,
    pub backups_size: u64,
    pub last_captured: DateTime<Utc>,
}

/// The parts of [`ArchiveMetadata`] that come from the capture rather than the directory.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSeed {
    pub display_name: String,
    pub backup_type: BackupType,
}

impl From<&ArchiveMetadata> for MetadataSeed {
    fn from(m: &ArchiveMetadata) -> Self {
        Self { display_name: m.display_name.clone(), backup_type: m.backup_type }
    }
}
