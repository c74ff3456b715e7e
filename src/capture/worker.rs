//! Single consumer of the capture queue.
//!
//! Jobs are handled strictly in arrival order: write + verify, evict, recompute
//! the sidecar, publish to the cache. A failure at any step is logged and the
//! worker moves to the next job; it never stops on a bad job.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::CaptureJob;
use crate::archive::retention::{self, RetentionPolicy};
use crate::archive::{ArchiveStore, ConfigKey, MetadataSeed};
use crate::cache::MetadataCache;

pub enum QueueItem {
    Capture(CaptureJob),
    /// Acknowledged once every item queued before it has been processed.
    Flush(oneshot::Sender<()>),
}

pub type JobSender = mpsc::UnboundedSender<QueueItem>;
pub type JobReceiver = mpsc::UnboundedReceiver<QueueItem>;

/// Lifecycle of one capture job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Writing,
    Verified,
    Evicting,
    MetadataPublished,
    /// Write or read-back failed; retention and metadata were not touched.
    WriteFailed,
    /// The version is on disk but the sidecar could not be recomputed; the
    /// cache keeps its previous entry.
    MetadataFailed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::MetadataPublished | JobState::WriteFailed | JobState::MetadataFailed)
    }
}

#[derive(Clone)]
pub struct CaptureWorker {
    store: ArchiveStore,
    cache: MetadataCache,
    defaults: RetentionPolicy,
}

impl CaptureWorker {
    pub fn new(store: ArchiveStore, cache: MetadataCache, defaults: RetentionPolicy) -> Self {
        Self { store, cache, defaults }
    }

    pub fn process(&self, job: &CaptureJob) -> JobState { self.process_at(job, Utc::now()) }

    /// Run one job to a terminal state, evaluating max-age against `now`.
    pub fn process_at(&self, job: &CaptureJob, now: DateTime<Utc>) -> JobState {
        let v = &job.version;
        debug!(target: "confhist::capture", group = %v.group, id = %v.id, state = ?JobState::Writing, "job dequeued");
        let path = match self.store.write_version(&v.group, &v.id, &v.captured_at, &v.content) {
            Ok(p) => p,
            Err(e) => {
                error!(target: "confhist::capture", group = %v.group, id = %v.id, error = %e, "Failed to save config backup");
                return JobState::WriteFailed;
            }
        };
        debug!(target: "confhist::capture", file = %path.display(), state = ?JobState::Verified, "backup verified");

        let Some(dir) = path.parent().map(|p| p.to_path_buf()) else {
            return JobState::MetadataFailed;
        };

        let policy = RetentionPolicy::effective(&self.defaults, &job.target.retention);
        match retention::evict(&dir, &policy, now) {
            Ok(report) if !report.removed.is_empty() || !report.failed.is_empty() => {
                debug!(target: "confhist::capture", state = ?JobState::Evicting, removed = report.removed.len(), failed = report.failed.len(), "retention applied")
            }
            Ok(_) => {}
            Err(e) => warn!(target: "confhist::capture", dir = %dir.display(), error = %e, "Failed to cleanup old backups"),
        }

        let seed = MetadataSeed { display_name: v.display_name.clone(), backup_type: job.target.strategy.backup_type() };
        let key = ConfigKey::new(v.group.clone(), v.id.clone());
        match self.store.refresh_metadata(&dir, Some(seed)) {
            Ok(Some(meta)) => {
                self.cache.publish(key, meta);
                info!(target: "confhist::capture", file = %path.display(), "Backup saved");
                JobState::MetadataPublished
            }
            Ok(None) => {
                // Retention removed every version, including the one just written.
                self.cache.evict(&key);
                JobState::MetadataPublished
            }
            Err(e) => {
                error!(target: "confhist::capture", dir = %dir.display(), error = %e, "Failed to update metadata");
                JobState::MetadataFailed
            }
        }
    }

    /// Start consuming `rx` on the runtime. The task ends once every sender is dropped
    /// and the queue has drained.
    pub fn spawn(self, rx: JobReceiver) -> JoinHandle<()> { tokio::spawn(self.run(rx)) }

    async fn run(self, mut rx: JobReceiver) {
        let mut processed = 0usize;
        while let Some(item) = rx.recv().await {
            match item {
                QueueItem::Capture(job) => {
                    let worker = self.clone();
                    match tokio::task::spawn_blocking(move || worker.process(&job)).await {
                        Ok(_) => processed += 1,
                        Err(e) => error!(target: "confhist::capture", error = %e, "capture job panicked"),
                    }
                }
                QueueItem::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        info!(target: "confhist::capture", processed, "capture queue drained");
    }
}
