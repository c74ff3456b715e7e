//! Config Registry boundary.
//!
//! Settings arrive as JSON (`AppSettings`) and are resolved once into immutable
//! [`Target`]s. Strategy-dependent behavior hangs off the [`BackupStrategy`]
//! tag chosen here; nothing downstream re-reads the raw `backupType` string.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::retention::RetentionPolicy;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Single,
    Multiple,
    Directory,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Single => "single",
            BackupType::Multiple => "multiple",
            BackupType::Directory => "directory",
        }
    }
}

/// One entry of `configs` in the settings file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TargetSettings {
    pub name: String,
    /// Live path relative to `configDir`; doubles as the archive group.
    pub path: String,
    pub backup_type: BackupType,
    #[serde(default)]
    pub id_node: Option<String>,
    #[serde(default)]
    pub friendly_name_node: Option<String>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_backup_age_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    pub config_dir: PathBuf,
    pub backup_dir: PathBuf,
    #[serde(default)]
    pub default_max_backups: Option<usize>,
    #[serde(default)]
    pub default_max_backup_age_days: Option<u32>,
    #[serde(default)]
    pub configs: Vec<TargetSettings>,
}

impl AppSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse settings JSON in {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStrategy {
    /// Whole file is one item.
    Single,
    /// Top-level sequence; each element is one item keyed by `id_field`.
    Multiple { id_field: String, label_field: String },
    /// Every file inside the directory is one item.
    Directory,
}

impl BackupStrategy {
    pub fn backup_type(&self) -> BackupType {
        match self {
            BackupStrategy::Single => BackupType::Single,
            BackupStrategy::Multiple { .. } => BackupType::Multiple,
            BackupStrategy::Directory => BackupType::Directory,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub name: String,
    pub group: String,
    pub strategy: BackupStrategy,
    pub retention: RetentionPolicy,
}

impl Target {
    pub fn live_path(&self, live_root: &Path) -> PathBuf { live_root.join(&self.group) }

    fn from_settings(s: &TargetSettings) -> Result<Self> {
        if let Err(e) = crate::paths::validate_component(&s.path) {
            bail!("config '{}' has an unusable path '{}': {}", s.name, s.path, e);
        }
        // The archive tree is exactly <group>/<id>; a nested group would sit below the startup scan.
        if s.path.contains(['/', '\\']) {
            bail!("config '{}' path '{}' must name an entry directly inside configDir", s.name, s.path);
        }
        let strategy = match s.backup_type {
            BackupType::Single => BackupStrategy::Single,
            BackupType::Directory => BackupStrategy::Directory,
            BackupType::Multiple => {
                let Some(id_field) = s.id_node.clone().filter(|f| !f.is_empty()) else {
                    bail!("config '{}' uses backupType 'multiple' but has no idNode", s.name);
                };
                let label_field = s.friendly_name_node.clone().unwrap_or_else(|| id_field.clone());
                BackupStrategy::Multiple { id_field, label_field }
            }
        };
        Ok(Self {
            name: s.name.clone(),
            group: s.path.clone(),
            strategy,
            retention: RetentionPolicy { max_count: s.max_backups, max_age_days: s.max_backup_age_days },
        })
    }
}

/// Resolved, read-only view of the settings used by every component.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    pub live_root: PathBuf,
    pub archive_root: PathBuf,
    pub defaults: RetentionPolicy,
    pub targets: Vec<Arc<Target>>,
}

impl ConfigRegistry {
    pub fn from_settings(settings: &AppSettings) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(settings.configs.len());
        for s in &settings.configs {
            let target = Target::from_settings(s)?;
            if !seen.insert(target.group.clone()) {
                bail!("config path '{}' is listed more than once", target.group);
            }
            targets.push(Arc::new(target));
        }
        Ok(Self {
            live_root: settings.config_dir.clone(),
            archive_root: settings.backup_dir.clone(),
            defaults: RetentionPolicy {
                max_count: settings.default_max_backups,
                max_age_days: settings.default_max_backup_age_days,
            },
            targets,
        })
    }

    pub fn find_by_group(&self, group: &str) -> Option<&Arc<Target>> {
        self.targets.iter().find(|t| t.group == group)
    }
}
