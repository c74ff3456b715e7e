//! Change detection.
//!
//! One OS watcher per process. Watches are registered lazily per target: the
//! parent directory for `single`/`multiple` targets, the directory itself for
//! `directory` targets. Each notification path is resolved to its target, read
//! from disk, and turned into capture jobs on the shared queue. Detection never
//! stops on a bad file; read failures are logged and the loop continues.

use anyhow::{bail, Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::capture::{self, JobSender, QueueItem};
use crate::config::{BackupStrategy, Target};

/// Live path -> target lookup shared between registration and the event loop.
#[derive(Default)]
pub struct WatchRegistry {
    files: HashMap<PathBuf, Arc<Target>>,
    dir_targets: HashMap<PathBuf, Arc<Target>>,
    watched_dirs: HashSet<PathBuf>,
}

impl WatchRegistry {
    pub fn register_file(&mut self, path: PathBuf, target: Arc<Target>) { self.files.insert(path, target); }

    pub fn register_dir(&mut self, dir: PathBuf, target: Arc<Target>) { self.dir_targets.insert(dir, target); }

    /// Exact file match first; otherwise a file whose parent is a registered
    /// `directory` target, which covers files created after registration.
    pub fn resolve(&self, path: &Path) -> Option<Arc<Target>> {
        if let Some(t) = self.files.get(path) {
            return Some(Arc::clone(t));
        }
        self.dir_targets
            .get(path.parent()?)
            .filter(|t| t.strategy == BackupStrategy::Directory)
            .cloned()
    }

    pub fn is_watched(&self, dir: &Path) -> bool { self.watched_dirs.contains(dir) }

    pub fn file_count(&self) -> usize { self.files.len() }
}

pub fn is_capture_event(kind: &EventKind) -> bool { matches!(kind, EventKind::Create(_) | EventKind::Modify(_)) }

pub struct ChangeDetector {
    live_root: PathBuf,
    registry: Arc<RwLock<WatchRegistry>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ChangeDetector {
    /// Create the OS watcher and spawn the event loop. No paths are watched yet.
    pub fn start(live_root: PathBuf, jobs: JobSender) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.send(res);
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        let registry = Arc::new(RwLock::new(WatchRegistry::default()));
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(run(Arc::clone(&registry), event_rx, jobs, stop_rx));
        info!(target: "confhist::watcher", root = %live_root.display(), "change detector started");
        Ok(Self {
            live_root,
            registry,
            watcher: Mutex::new(Some(watcher)),
            stop_tx: Mutex::new(Some(stop_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    pub fn registry(&self) -> &Arc<RwLock<WatchRegistry>> { &self.registry }

    /// Register `target` and make sure its directory is watched. Safe to call
    /// repeatedly; a directory is only handed to the OS once.
    pub fn watch_target(&self, target: &Arc<Target>) -> Result<()> {
        let live = target.live_path(&self.live_root);
        let watch_dir = match target.strategy {
            BackupStrategy::Directory => canonical(&live)?,
            _ => canonical(live.parent().context("live path has no parent directory")?)?,
        };

        let existing = match target.strategy {
            BackupStrategy::Directory => list_files(&watch_dir)?,
            _ => Vec::new(),
        };
        {
            let mut reg = self.registry.write();
            match target.strategy {
                BackupStrategy::Directory => {
                    for file in existing {
                        reg.register_file(file, Arc::clone(target));
                    }
                    reg.register_dir(watch_dir.clone(), Arc::clone(target));
                }
                _ => {
                    let name = live.file_name().context("live path has no file name")?;
                    reg.register_file(watch_dir.join(name), Arc::clone(target));
                }
            }
        }

        let mut guard = self.watcher.lock();
        let Some(watcher) = guard.as_mut() else {
            bail!("change detector is stopped");
        };
        if self.registry.read().is_watched(&watch_dir) {
            debug!(target: "confhist::watcher", dir = %watch_dir.display(), "Directory already being watched");
            return Ok(());
        }
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch directory {}", watch_dir.display()))?;
        self.registry.write().watched_dirs.insert(watch_dir.clone());
        info!(target: "confhist::watcher", dir = %watch_dir.display(), config = %target.name, "Watching directory");
        Ok(())
    }

    /// Drop the OS watcher and wait for the event loop to exit.
    pub async fn stop(&self) {
        self.watcher.lock().take();
        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!(target: "confhist::watcher", error = %e, "change detector task failed");
            }
        }
    }
}

fn canonical(path: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(path).with_context(|| format!("Failed to resolve {}", path.display()))
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read directory {}", dir.display()))?;
    Ok(entries
        .flatten()
        .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .collect())
}

async fn run(
    registry: Arc<RwLock<WatchRegistry>>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    jobs: JobSender,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            next = events.recv() => match next {
                Some(Ok(event)) => {
                    if !dispatch(&registry, event, &jobs).await {
                        break;
                    }
                }
                Some(Err(e)) => error!(target: "confhist::watcher", error = %e, "File watcher error"),
                None => break,
            },
        }
    }
    info!(target: "confhist::watcher", "change detector stopped");
}

/// Returns false once the capture queue is gone.
async fn dispatch(registry: &Arc<RwLock<WatchRegistry>>, event: Event, jobs: &JobSender) -> bool {
    if !is_capture_event(&event.kind) {
        return true;
    }
    for path in event.paths {
        if path.is_dir() {
            continue;
        }
        let resolved = registry.read().resolve(&path);
        let Some(target) = resolved else {
            debug!(target: "confhist::watcher", file = %path.display(), "No backup options found for changed file");
            continue;
        };
        debug!(target: "confhist::watcher", file = %path.display(), kind = ?event.kind, "File change detected");
        let read = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || capture::jobs_for_path(&path, &target)).await
        };
        match read {
            Ok(Ok(found)) => {
                for job in found {
                    if jobs.send(QueueItem::Capture(job)).is_err() {
                        return false;
                    }
                }
            }
            Ok(Err(e)) => error!(target: "confhist::watcher", file = %path.display(), error = %e, "Error reading changed file"),
            Err(e) => error!(target: "confhist::watcher", file = %path.display(), error = %e, "reader task failed"),
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::retention::RetentionPolicy;
    use std::time::Duration;

    fn target(group: &str, strategy: BackupStrategy) -> Arc<Target> {
        Arc::new(Target { name: group.into(), group: group.into(), strategy, retention: RetentionPolicy::default() })
    }

    #[test]
    fn resolve_prefers_exact_then_directory_parent() {
        let mut reg = WatchRegistry::default();
        let single = target("configuration.yaml", BackupStrategy::Single);
        let dir = target("packages", BackupStrategy::Directory);
        reg.register_file(PathBuf::from("/cfg/configuration.yaml"), Arc::clone(&single));
        reg.register_file(PathBuf::from("/cfg/packages/lights.yaml"), Arc::clone(&dir));
        reg.register_dir(PathBuf::from("/cfg/packages"), Arc::clone(&dir));

        assert!(Arc::ptr_eq(&reg.resolve(Path::new("/cfg/configuration.yaml")).unwrap(), &single));
        assert!(Arc::ptr_eq(&reg.resolve(Path::new("/cfg/packages/new.yaml")).unwrap(), &dir));
        assert!(reg.resolve(Path::new("/cfg/secrets.yaml")).is_none());
        assert!(reg.resolve(Path::new("/cfg/packages")).is_none());
        assert_eq!(reg.file_count(), 2);
    }

    #[test]
    fn only_create_and_modify_trigger_capture() {
        use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};
        assert!(is_capture_event(&EventKind::Create(CreateKind::File)));
        assert!(is_capture_event(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_capture_event(&EventKind::Remove(RemoveKind::File)));
        assert!(!is_capture_event(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn registering_twice_watches_once() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("a.yaml"), "a: 1\n").unwrap();
        std::fs::write(tmp.path().join("b.yaml"), "b: 1\n").unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let detector = ChangeDetector::start(tmp.path().to_path_buf(), tx).unwrap();
        detector.watch_target(&target("a.yaml", BackupStrategy::Single)).unwrap();
        detector.watch_target(&target("b.yaml", BackupStrategy::Single)).unwrap();
        detector.watch_target(&target("a.yaml", BackupStrategy::Single)).unwrap();
        {
            let reg = detector.registry().read();
            assert_eq!(reg.watched_dirs.len(), 1);
            assert_eq!(reg.file_count(), 2);
        }
        detector.stop().await;
        assert!(detector.watch_target(&target("a.yaml", BackupStrategy::Single)).is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_change_enqueues_capture() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("automations.yaml");
        std::fs::write(&file, "- id: a1\n  alias: Before\n").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let detector = ChangeDetector::start(tmp.path().to_path_buf(), tx).unwrap();
        let autos = target("automations.yaml", BackupStrategy::Multiple { id_field: "id".into(), label_field: "alias".into() });
        detector.watch_target(&autos).unwrap();

        std::fs::write(&file, "- id: a1\n  alias: After\n").unwrap();
        let found = tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(item) = rx.recv().await {
                if let QueueItem::Capture(job) = item {
                    if job.version.display_name == "After" {
                        return Some(job);
                    }
                }
            }
            None
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.version.id, "a1");
        assert_eq!(found.version.group, "automations.yaml");
        detector.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn bad_edit_is_dropped_and_detection_continues() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("automations.yaml");
        std::fs::write(&file, "- id: a1\n  alias: Before\n").unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let detector = ChangeDetector::start(tmp.path().to_path_buf(), tx).unwrap();
        let autos = target("automations.yaml", BackupStrategy::Multiple { id_field: "id".into(), label_field: "alias".into() });
        detector.watch_target(&autos).unwrap();

        std::fs::write(&file, "- id: a1\n  alias: [unclosed\n").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&file, "id: a1\nalias: not a sequence\n").unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&file, "- id: a1\n  alias: Fixed\n").unwrap();

        let labels = tokio::time::timeout(Duration::from_secs(10), async {
            let mut labels = Vec::new();
            while let Some(item) = rx.recv().await {
                if let QueueItem::Capture(job) = item {
                    labels.push(job.version.display_name.clone());
                    if job.version.display_name == "Fixed" {
                        break;
                    }
                }
            }
            labels
        })
        .await
        .unwrap();
        assert_eq!(labels.last().map(String::as_str), Some("Fixed"));
        // Neither broken edit produced a job.
        assert!(labels.iter().all(|l| l == "Fixed" || l == "Before"));
        detector.stop().await;
    }
}
