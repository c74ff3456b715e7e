//!
//! confhist archive store
//! ----------------------
//! Pure filesystem operations over the version tree:
//! `<root>/<group>/<id>/<YYYYMMDDThhmmss>.yaml` plus one `metadata.json` sidecar
//! per `<group>/<id>`. File names double as sort keys, so lexicographic order
//! is chronological order.
//!
//! Every entry point runs its group/id/filename inputs through
//! [`crate::paths::sanitize_path`] before touching the disk. The sidecar is
//! recomputed from the directory after each mutation and written via a temp
//! file plus rename, so a concurrent reader never sees half a JSON document.
//!
//! Nothing here touches the metadata cache; callers publish or evict after the
//! I/O has finished.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{HistoryError, HistoryResult};
use crate::paths::{self, is_version_file, metadata_path, parse_version_timestamp, sanitize_path, version_file_name};

pub mod metadata;
pub mod retention;

pub use metadata::{ArchiveMetadata, ConfigKey, MetadataSeed};

/// One archived version as listed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub filename: String,
    pub date: DateTime<Utc>,
    pub size: u64,
}

/// Filesystem view of the archive root.
///
/// Inputs are only checked with the lenient [`sanitize_path`], which lets an
/// absolute component such as `/etc` through; `Path::join` then resolves it
/// outside the root. Untrusted group/id/filename values must go through
/// `HistoryService`, which applies [`crate::paths::validate_component`] first.
#[derive(Clone, Debug)]
pub struct ArchiveStore {
    root: PathBuf,
}

impl ArchiveStore {
    /// Open the archive rooted at `root`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(root: P) -> HistoryResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| HistoryError::io("failed to create archive root", &root, e))?;
        Ok(Self { root })
    }

    pub fn root_path(&self) -> &Path { &self.root }

    /// Directory for `(group, id)`; validated but not created.
    pub fn entry_dir(&self, group: &str, id: &str) -> HistoryResult<PathBuf> {
        sanitize_path(group).map_err(|_| HistoryError::invalid("group parameter"))?;
        sanitize_path(id).map_err(|_| HistoryError::invalid("id parameter"))?;
        Ok(paths::entry_dir(&self.root, group, id))
    }

    fn version_path(&self, group: &str, id: &str, filename: &str) -> HistoryResult<(PathBuf, PathBuf)> {
        let dir = self.entry_dir(group, id)?;
        sanitize_path(filename).map_err(|_| HistoryError::invalid("filename parameter"))?;
        // Only version files are addressable; the sidecar is never read or deleted by name.
        if !is_version_file(filename) {
            return Err(HistoryError::not_found(format!("backup file {filename}")));
        }
        let file = dir.join(filename);
        Ok((dir, file))
    }

    pub fn ensure_entry_dir(&self, group: &str, id: &str) -> HistoryResult<PathBuf> {
        let dir = self.entry_dir(group, id)?;
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| HistoryError::io("failed to create config backup directory", &dir, e))?;
        }
        Ok(dir)
    }

    /// Write one version and read it straight back. Returns the version's path.
    pub fn write_version(&self, group: &str, id: &str, captured_at: &DateTime<Utc>, content: &[u8]) -> HistoryResult<PathBuf> {
        let dir = self.ensure_entry_dir(group, id)?;
        let path = dir.join(version_file_name(captured_at));
        if path.exists() {
            // Same-second capture for this item; the newer content replaces the file.
            warn!(target: "confhist::archive", file = %path.display(), "Overwriting version captured within the same second");
        }
        fs::write(&path, content).map_err(|e| HistoryError::io("failed to save config backup", &path, e))?;
        fs::read(&path).map_err(|source| HistoryError::Verification { path: path.clone(), source })?;
        debug!(target: "confhist::archive", file = %path.display(), bytes = content.len(), "version written and verified");
        Ok(path)
    }

    /// Versions for `(group, id)`, newest first. `NotFound` if nothing was ever archived.
    pub fn list_versions(&self, group: &str, id: &str) -> HistoryResult<Vec<VersionInfo>> {
        let dir = self.entry_dir(group, id)?;
        if !dir.is_dir() {
            return Err(HistoryError::not_found(format!("config {id}")));
        }
        scan_versions(&dir)
    }

    pub fn read_version(&self, group: &str, id: &str, filename: &str) -> HistoryResult<Vec<u8>> {
        let (_, file) = self.version_path(group, id, filename)?;
        if !file.is_file() {
            return Err(HistoryError::not_found(format!("backup file {filename}")));
        }
        fs::read(&file).map_err(|e| HistoryError::io("failed to read backup file", &file, e))
    }

    /// Delete one version and recompute the sidecar.
    ///
    /// `Ok(None)` means no versions remain: sidecar and directory are gone and the
    /// caller must drop its cache entry.
    pub fn delete_version(&self, group: &str, id: &str, filename: &str) -> HistoryResult<Option<ArchiveMetadata>> {
        let (dir, file) = self.version_path(group, id, filename)?;
        if !file.is_file() {
            return Err(HistoryError::not_found(format!("backup file {filename}")));
        }
        fs::remove_file(&file).map_err(|e| HistoryError::io("failed to delete backup file", &file, e))?;
        info!(target: "confhist::archive", file = %file.display(), "Backup deleted");
        self.refresh_metadata(&dir, None)
    }

    /// Remove every version of `(group, id)` together with its sidecar.
    pub fn delete_all(&self, group: &str, id: &str) -> HistoryResult<()> {
        let dir = self.entry_dir(group, id)?;
        if !dir.is_dir() {
            return Err(HistoryError::not_found(format!("config directory {id}")));
        }
        fs::remove_dir_all(&dir).map_err(|e| HistoryError::io("failed to delete config directory", &dir, e))?;
        info!(target: "confhist::archive", group = group, id = id, "All backups deleted");
        Ok(())
    }

    /// Recompute the sidecar for `dir` from its current version files.
    ///
    /// With no `seed`, display name and backup type carry over from the existing
    /// sidecar. When the directory holds no versions the sidecar and the empty
    /// directory are removed and `Ok(None)` is returned.
    pub fn refresh_metadata(&self, dir: &Path, seed: Option<MetadataSeed>) -> HistoryResult<Option<ArchiveMetadata>> {
        let versions = scan_versions(dir)?;
        let Some(newest) = versions.first() else {
            let sidecar = metadata_path(dir);
            if let Err(e) = fs::remove_file(&sidecar) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(target: "confhist::archive", path = %sidecar.display(), error = %e, "Failed to remove metadata file");
                }
            }
            if let Err(e) = fs::remove_dir(dir) {
                warn!(target: "confhist::archive", path = %dir.display(), error = %e, "Failed to remove empty backup directory");
            }
            return Ok(None);
        };
        let seed = match seed {
            Some(s) => s,
            None => MetadataSeed::from(&read_metadata(dir)?),
        };
        let meta = ArchiveMetadata {
            display_name: seed.display_name,
            backup_type: seed.backup_type,
            backup_count: versions.len(),
            backups_size: versions.iter().map(|v| v.size).sum(),
            last_captured: newest.date,
        };
        write_metadata(dir, &meta)?;
        Ok(Some(meta))
    }

    /// Read every sidecar under the root. Unreadable sidecars are logged and skipped.
    pub fn scan_metadata(&self) -> HistoryResult<Vec<(ConfigKey, ArchiveMetadata)>> {
        fs::read_dir(&self.root).map_err(|e| HistoryError::io("failed to read backup folder", &self.root, e))?;
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(2).max_depth(2).sort_by_file_name() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(target: "confhist::archive", error = %e, "Skipping unreadable archive entry");
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.path();
            let (Some(group), Some(id)) = (
                dir.parent().and_then(|p| p.file_name()).map(|s| s.to_string_lossy().into_owned()),
                dir.file_name().map(|s| s.to_string_lossy().into_owned()),
            ) else {
                continue;
            };
            match read_metadata(dir) {
                Ok(meta) => out.push((ConfigKey::new(group, id), meta)),
                Err(e) => warn!(target: "confhist::archive", dir = %dir.display(), error = %e, "Skipping archive entry without usable metadata"),
            }
        }
        Ok(out)
    }
}

/// Version files in `dir`, newest first. Unparseable names fall back to the file's mtime.
pub fn scan_versions(dir: &Path) -> HistoryResult<Vec<VersionInfo>> {
    let entries = fs::read_dir(dir).map_err(|e| HistoryError::io("failed to read config folder", dir, e))?;
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_version_file(&name) {
            continue;
        }
        let Ok(md) = entry.metadata() else { continue };
        if !md.is_file() {
            continue;
        }
        let date = match parse_version_timestamp(&name) {
            Some(ts) => ts,
            None => md.modified().map(DateTime::<Utc>::from).unwrap_or_default(),
        };
        out.push(VersionInfo { filename: name, date, size: md.len() });
    }
    out.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| b.filename.cmp(&a.filename)));
    Ok(out)
}

pub fn read_metadata(dir: &Path) -> HistoryResult<ArchiveMetadata> {
    let path = metadata_path(dir);
    let blob = fs::read(&path).map_err(|e| HistoryError::io("failed to read metadata file", &path, e))?;
    serde_json::from_slice(&blob).map_err(|e| HistoryError::parse("failed to parse metadata JSON", e))
}

pub fn write_metadata(dir: &Path, meta: &ArchiveMetadata) -> HistoryResult<()> {
    let path = metadata_path(dir);
    let bytes = serde_json::to_vec_pretty(meta).map_err(|e| HistoryError::parse("failed to marshal metadata", e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).map_err(|e| HistoryError::io("failed to write metadata", &tmp, e))?;
    fs::rename(&tmp, &path).map_err(|e| HistoryError::io("failed to write metadata", &path, e))?;
    Ok(())
}
