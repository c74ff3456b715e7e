//! In-memory index of archive metadata, shared between the capture pipeline
//! and API readers.
//!
//! Entries are `Arc<ArchiveMetadata>` swapped in whole under a short write lock,
//! so a reader either sees the previous entry or the next one. The lock is only
//! ever held around map operations; all disk I/O finishes before it is taken.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::archive::{ArchiveMetadata, ArchiveStore, ConfigKey};
use crate::error::HistoryResult;

/// One row of the cached listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedConfig {
    pub group: String,
    pub id: String,
    #[serde(flatten)]
    pub metadata: ArchiveMetadata,
}

#[derive(Clone, Default)]
pub struct MetadataCache {
    map: Arc<RwLock<HashMap<ConfigKey, Arc<ArchiveMetadata>>>>,
}

impl MetadataCache {
    pub fn new() -> Self { Self::default() }

    /// Build the cache from a full scan of the archive root.
    pub fn load(store: &ArchiveStore) -> HistoryResult<Self> {
        let entries: HashMap<ConfigKey, Arc<ArchiveMetadata>> = store
            .scan_metadata()?
            .into_iter()
            .map(|(k, m)| (k, Arc::new(m)))
            .collect();
        tracing::info!(target: "confhist::cache", entries = entries.len(), "metadata cache loaded");
        Ok(Self { map: Arc::new(RwLock::new(entries)) })
    }

    /// Replace whatever is cached for `key`.
    pub fn publish(&self, key: ConfigKey, meta: ArchiveMetadata) {
        let meta = Arc::new(meta);
        self.map.write().insert(key, meta);
    }

    /// Drop `key`. Returns true if an entry was present.
    pub fn evict(&self, key: &ConfigKey) -> bool { self.map.write().remove(key).is_some() }

    pub fn get(&self, key: &ConfigKey) -> Option<Arc<ArchiveMetadata>> { self.map.read().get(key).cloned() }

    pub fn len(&self) -> usize { self.map.read().len() }

    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }

    /// Snapshot of every entry, sorted by display name (ties by group, then id).
    pub fn list(&self) -> Vec<CachedConfig> {
        let mut rows: Vec<CachedConfig> = self
            .map
            .read()
            .iter()
            .map(|(k, m)| CachedConfig { group: k.group.clone(), id: k.id.clone(), metadata: ArchiveMetadata::clone(m) })
            .collect();
        rows.sort_by(|a, b| {
            a.metadata
                .display_name
                .cmp(&b.metadata.display_name)
                .then_with(|| a.group.cmp(&b.group))
                .then_with(|| a.id.cmp(&b.id))
        });
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackupType;
    use chrono::{TimeZone, Utc};

    fn meta(name: &str, count: usize) -> ArchiveMetadata {
        ArchiveMetadata {
            display_name: name.to_string(),
            backup_type: BackupType::Multiple,
            backup_count: count,
            backups_size: count as u64 * 10,
            last_captured: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn publish_replaces_and_evict_removes() {
        let cache = MetadataCache::new();
        let key = ConfigKey::new("automations.yaml", "a1");
        cache.publish(key.clone(), meta("Lights", 1));
        cache.publish(key.clone(), meta("Lights", 2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().backup_count, 2);
        assert!(cache.evict(&key));
        assert!(!cache.evict(&key));
        assert!(cache.is_empty());
    }

    #[test]
    fn list_sorted_by_display_name() {
        let cache = MetadataCache::new();
        cache.publish(ConfigKey::new("automations.yaml", "a2"), meta("Porch", 1));
        cache.publish(ConfigKey::new("automations.yaml", "a1"), meta("Kitchen", 1));
        cache.publish(ConfigKey::new("configuration.yaml", "configuration.yaml"), meta("Configuration", 1));
        let names: Vec<String> = cache.list().iter().map(|c| c.metadata.display_name.clone()).collect();
        assert_eq!(names, vec!["Configuration", "Kitchen", "Porch"]);
    }

    #[test]
    fn listing_row_flattens_metadata() {
        let cache = MetadataCache::new();
        cache.publish(ConfigKey::new("automations.yaml", "a1"), meta("Kitchen", 3));
        let v = serde_json::to_value(&cache.list()[0]).unwrap();
        assert_eq!(v["group"], "automations.yaml");
        assert_eq!(v["id"], "a1");
        assert_eq!(v["displayName"], "Kitchen");
        assert_eq!(v["backupCount"], 3);
    }

    #[test]
    fn concurrent_readers_never_see_torn_entries() {
        let cache = MetadataCache::new();
        let key = ConfigKey::new("g", "i");
        cache.publish(key.clone(), meta("v0", 0));

        let writer = {
            let cache = cache.clone();
            let key = key.clone();
            std::thread::spawn(move || {
                for n in 1..=2000usize {
                    cache.publish(key.clone(), meta(&format!("v{n}"), n));
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..2000 {
                        let m = cache.get(&key).unwrap();
                        // Every field of one entry comes from the same publish.
                        assert_eq!(m.display_name, format!("v{}", m.backup_count));
                        assert_eq!(m.backups_size, m.backup_count as u64 * 10);
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cache.get(&key).unwrap().backup_count, 2000);
    }
}
