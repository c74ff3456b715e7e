//!
//! confhist service facade
//! -----------------------
//! Owns the archive store, the metadata cache, the capture queue and worker,
//! and the change detector. This is the surface an HTTP layer would sit on.
//!
//! Every operation taking a group, id, or filename runs the strict
//! [`validate_component`] check before anything else and reports failures as
//! [`AppError`]. Pipeline failures never surface here; they are logged by the
//! background tasks.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::archive::{ArchiveMetadata, ArchiveStore, ConfigKey, VersionInfo};
use crate::cache::{CachedConfig, MetadataCache};
use crate::capture::{self, CaptureWorker, JobSender, QueueItem};
use crate::config::{ConfigRegistry, Target};
use crate::diff::{self, VersionDiff};
use crate::error::{AppError, AppResult, HistoryError};
use crate::paths::validate_component;
use crate::restore::{self, RestoreReport};
use crate::watcher::ChangeDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Start the change detector.
    pub watch: bool,
    /// Capture every target once during startup.
    pub backfill: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self { Self { watch: true, backfill: true } }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureSummary {
    pub targets: usize,
    pub jobs: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// Versions remain; `metadata` is the recomputed sidecar.
    Updated { metadata: ArchiveMetadata },
    /// That was the last version; the item is gone from the archive and the cache.
    Removed,
}

pub struct HistoryService {
    registry: Arc<ConfigRegistry>,
    store: ArchiveStore,
    cache: MetadataCache,
    jobs: Mutex<Option<JobSender>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    detector: Option<ChangeDetector>,
}

fn check(value: &str, what: &str) -> AppResult<()> {
    validate_component(value).map_err(|e| {
        warn!(target: "confhist::service", param = what, error = %e, "Rejected path parameter");
        AppError::invalid("invalid_input".to_string(), format!("invalid {what} parameter"))
    })
}

impl HistoryService {
    /// Bring up the archive, cache, worker and (optionally) the detector.
    ///
    /// Fails only if the archive root cannot be initialized or scanned.
    pub async fn start(registry: ConfigRegistry, options: ServiceOptions) -> Result<Self> {
        let store = ArchiveStore::new(&registry.archive_root)
            .with_context(|| format!("Failed to initialize archive root {}", registry.archive_root.display()))?;
        let cache = MetadataCache::load(&store).context("Failed to load archive metadata")?;

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = CaptureWorker::new(store.clone(), cache.clone(), registry.defaults).spawn(rx);

        let detector = if options.watch {
            match ChangeDetector::start(registry.live_root.clone(), tx.clone()) {
                Ok(d) => Some(d),
                Err(e) => {
                    error!(target: "confhist::service", error = %format!("{e:#}"), "Change detection disabled");
                    None
                }
            }
        } else {
            None
        };

        let service = Self {
            registry: Arc::new(registry),
            store,
            cache,
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            detector,
        };
        info!(
            target: "confhist::service",
            targets = service.registry.targets.len(),
            cached = service.cache.len(),
            watch = service.detector.is_some(),
            "history service started"
        );

        if options.backfill {
            let summary = service.capture_all().await;
            info!(target: "confhist::service", jobs = summary.jobs, failures = summary.failures, "Startup backup complete");
        } else {
            for target in &service.registry.targets {
                service.ensure_watch(target);
            }
        }
        Ok(service)
    }

    pub fn registry(&self) -> &ConfigRegistry { &self.registry }

    pub fn targets(&self) -> &[Arc<Target>] { &self.registry.targets }

    pub fn cache(&self) -> &MetadataCache { &self.cache }

    /// Every archived item with its cached metadata, sorted by display name.
    pub fn list_configs(&self) -> Vec<CachedConfig> { self.cache.list() }

    pub fn metadata(&self, group: &str, id: &str) -> Option<Arc<ArchiveMetadata>> {
        self.cache.get(&ConfigKey::new(group, id))
    }

    fn sender(&self) -> Option<JobSender> { self.jobs.lock().clone() }

    fn ensure_watch(&self, target: &Arc<Target>) {
        if let Some(detector) = &self.detector {
            if let Err(e) = detector.watch_target(target) {
                error!(target: "confhist::service", config = %target.name, error = %format!("{e:#}"), "Failed to watch config");
            }
        }
    }

    /// Capture every target and wait until the queue has processed the result.
    ///
    /// Also registers each target with the change detector the first time it
    /// is seen.
    pub async fn capture_all(&self) -> CaptureSummary {
        let mut summary = CaptureSummary::default();
        let Some(tx) = self.sender() else {
            warn!(target: "confhist::service", "capture requested after shutdown");
            return summary;
        };
        for target in &self.registry.targets {
            summary.targets += 1;
            self.ensure_watch(target);
            let live_root = self.registry.live_root.clone();
            let t = Arc::clone(target);
            match tokio::task::spawn_blocking(move || capture::jobs_for_target(&live_root, &t)).await {
                Ok(Ok(found)) => {
                    for job in found {
                        if tx.send(QueueItem::Capture(job)).is_err() {
                            summary.failures += 1;
                            break;
                        }
                        summary.jobs += 1;
                    }
                }
                Ok(Err(e)) => {
                    error!(target: "confhist::service", config = %target.name, error = %e, "Error backing up config");
                    summary.failures += 1;
                }
                Err(e) => {
                    error!(target: "confhist::service", config = %target.name, error = %e, "capture reader task failed");
                    summary.failures += 1;
                }
            }
        }
        drop(tx);
        self.flush().await;
        summary
    }

    /// Resolve once every job queued before this call has finished.
    pub async fn flush(&self) {
        let Some(tx) = self.sender() else { return };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(QueueItem::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn list_versions(&self, group: &str, id: &str) -> AppResult<Vec<VersionInfo>> {
        check(group, "group")?;
        check(id, "id")?;
        Ok(self.store.list_versions(group, id)?)
    }

    pub fn read_version(&self, group: &str, id: &str, filename: &str) -> AppResult<Vec<u8>> {
        check(group, "group")?;
        check(id, "id")?;
        check(filename, "filename")?;
        Ok(self.store.read_version(group, id, filename)?)
    }

    /// Delete one version; the cache follows the recomputed sidecar.
    pub fn delete_version(&self, group: &str, id: &str, filename: &str) -> AppResult<DeleteOutcome> {
        check(group, "group")?;
        check(id, "id")?;
        check(filename, "filename")?;
        let key = ConfigKey::new(group, id);
        match self.store.delete_version(group, id, filename)? {
            Some(metadata) => {
                self.cache.publish(key, metadata.clone());
                Ok(DeleteOutcome::Updated { metadata })
            }
            None => {
                self.cache.evict(&key);
                info!(target: "confhist::service", group = group, id = id, "Last backup deleted; config removed");
                Ok(DeleteOutcome::Removed)
            }
        }
    }

    pub fn delete_all(&self, group: &str, id: &str) -> AppResult<()> {
        check(group, "group")?;
        check(id, "id")?;
        self.store.delete_all(group, id)?;
        self.cache.evict(&ConfigKey::new(group, id));
        Ok(())
    }

    /// Restore one archived version onto the live target configured for `group`.
    pub fn restore(&self, group: &str, id: &str, filename: &str) -> AppResult<RestoreReport> {
        check(group, "group")?;
        check(id, "id")?;
        check(filename, "filename")?;
        let target = self
            .registry
            .find_by_group(group)
            .ok_or_else(|| HistoryError::not_found(format!("config {group}")))?;
        let blob = self.store.read_version(group, id, filename)?;
        Ok(restore::restore_version(&self.registry.live_root, target, id, &blob)?)
    }

    pub fn diff_versions(&self, group: &str, id: &str, left: &str, right: &str) -> AppResult<VersionDiff> {
        check(group, "group")?;
        check(id, "id")?;
        check(left, "filename")?;
        check(right, "filename")?;
        let old = self.store.read_version(group, id, left)?;
        let new = self.store.read_version(group, id, right)?;
        Ok(diff::diff_versions(left, &old, right, &new))
    }

    /// Stop watching, then let the worker drain whatever is already queued.
    pub async fn shutdown(&self) {
        if let Some(detector) = &self.detector {
            detector.stop().await;
        }
        self.jobs.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(target: "confhist::service", error = %e, "capture worker failed");
            }
        }
        info!(target: "confhist::service", "history service stopped");
    }
}
