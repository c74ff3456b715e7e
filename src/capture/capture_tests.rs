use super::*;
use crate::archive::retention::RetentionPolicy;
use crate::archive::{ArchiveStore, ConfigKey};
use crate::cache::MetadataCache;
use crate::config::BackupType;
use chrono::TimeZone;

fn target(group: &str, strategy: BackupStrategy) -> Arc<Target> {
    Arc::new(Target { name: format!("{group} target"), group: group.to_string(), strategy, retention: RetentionPolicy::default() })
}

fn automations() -> Arc<Target> {
    target("automations.yaml", BackupStrategy::Multiple { id_field: "id".into(), label_field: "alias".into() })
}

fn at(day: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, day, 8, 30, 0).unwrap() }

#[test]
fn capture_time_has_no_subseconds() {
    assert_eq!(capture_time().timestamp_subsec_nanos(), 0);
}

#[test]
fn scalar_text_covers_common_id_types() {
    assert_eq!(scalar_text(&Value::from("abc")), Some("abc".into()));
    assert_eq!(scalar_text(&serde_yaml::from_str::<Value>("1700000000").unwrap()), Some("1700000000".into()));
    assert_eq!(scalar_text(&Value::Bool(true)), Some("true".into()));
    assert_eq!(scalar_text(&Value::Null), None);
    assert_eq!(scalar_text(&serde_yaml::from_str::<Value>("[1, 2]").unwrap()), None);
}

#[test]
fn single_keeps_bytes_verbatim() {
    let tmp = tempfile::tempdir().unwrap();
    let raw = "# comment kept\nhomeassistant:\n  name: Home   # trailing\n";
    let path = tmp.path().join("configuration.yaml");
    fs::write(&path, raw).unwrap();
    let t = target("configuration.yaml", BackupStrategy::Single);

    let v = read_single(&path, &t, at(1)).unwrap();
    assert_eq!(v.content, raw.as_bytes());
    assert_eq!(v.id, "configuration.yaml");
    assert_eq!(v.group, "configuration.yaml");
    assert_eq!(v.display_name, "configuration.yaml target");
    assert_eq!(v.captured_at, at(1));
}

#[test]
fn single_rejects_sequence_and_bad_yaml() {
    let tmp = tempfile::tempdir().unwrap();
    let t = target("x.yaml", BackupStrategy::Single);
    let path = tmp.path().join("x.yaml");
    fs::write(&path, "- a\n- b\n").unwrap();
    assert!(matches!(read_single(&path, &t, at(1)), Err(HistoryError::Parse { .. })));
    fs::write(&path, "key: [unclosed\n").unwrap();
    assert!(matches!(read_single(&path, &t, at(1)), Err(HistoryError::Parse { .. })));
    assert!(matches!(read_single(&tmp.path().join("missing.yaml"), &t, at(1)), Err(HistoryError::Io { .. })));
}

#[test]
fn multiple_splits_elements_by_id() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("automations.yaml");
    fs::write(
        &path,
        "- id: a1\n  alias: Kitchen\n  trigger: []\n- id: a2\n  trigger: []\n- alias: no id here\n- id: 42\n  alias: Numeric\n",
    )
    .unwrap();

    let versions = read_multiple(&path, &automations(), at(2)).unwrap();
    let ids: Vec<&str> = versions.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["a1", "a2", "42"]);
    assert_eq!(versions[0].display_name, "Kitchen");
    // Missing label falls back to the id.
    assert_eq!(versions[1].display_name, "a2");

    let element: Value = serde_yaml::from_slice(&versions[0].content).unwrap();
    assert_eq!(field_text(&element, "alias").as_deref(), Some("Kitchen"));
    assert!(element.get("trigger").is_some());
}

#[test]
fn multiple_requires_top_level_sequence() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("automations.yaml");
    fs::write(&path, "id: a1\nalias: Kitchen\n").unwrap();
    assert!(matches!(read_multiple(&path, &automations(), at(1)), Err(HistoryError::Parse { .. })));
}

#[test]
fn directory_target_skips_bad_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("packages");
    fs::create_dir(&dir).unwrap();
    fs::write(dir.join("lights.yaml"), "light: []\n").unwrap();
    fs::write(dir.join("broken.yaml"), "a: [\n").unwrap();
    fs::write(dir.join("climate.yaml"), "climate: {}\n").unwrap();
    fs::create_dir(dir.join("nested")).unwrap();
    let t = target("packages", BackupStrategy::Directory);

    let jobs = jobs_for_target(tmp.path(), &t).unwrap();
    let ids: Vec<&str> = jobs.iter().map(|j| j.version.id.as_str()).collect();
    assert_eq!(ids, vec!["climate.yaml", "lights.yaml"]);
    assert!(jobs.iter().all(|j| j.version.group == "packages"));
    assert_eq!(jobs[1].version.display_name, "lights.yaml");
}

#[test]
fn jobs_for_path_follows_strategy() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("automations.yaml");
    fs::write(&path, "- id: a1\n- id: a2\n").unwrap();
    let jobs = jobs_for_path(&path, &automations()).unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| Arc::ptr_eq(&j.target, &jobs[0].target)));
}

fn worker(root: &std::path::Path, defaults: RetentionPolicy) -> (CaptureWorker, ArchiveStore, MetadataCache) {
    let store = ArchiveStore::new(root).unwrap();
    let cache = MetadataCache::new();
    (CaptureWorker::new(store.clone(), cache.clone(), defaults), store, cache)
}

fn job(t: &Arc<Target>, id: &str, label: &str, body: &str, when: DateTime<Utc>) -> CaptureJob {
    CaptureJob {
        target: Arc::clone(t),
        version: CapturedVersion {
            group: t.group.clone(),
            id: id.into(),
            display_name: label.into(),
            content: body.as_bytes().to_vec(),
            captured_at: when,
        },
    }
}

#[test]
fn worker_publishes_post_eviction_metadata() {
    let tmp = tempfile::tempdir().unwrap();
    let (w, store, cache) = worker(tmp.path(), RetentionPolicy { max_count: Some(2), max_age_days: None });
    let t = automations();
    for day in 1..=5 {
        let state = w.process_at(&job(&t, "a1", &format!("Kitchen v{day}"), "id: a1\n", at(day)), at(6));
        assert_eq!(state, JobState::MetadataPublished);
        assert!(state.is_terminal());
    }
    let versions = store.list_versions("automations.yaml", "a1").unwrap();
    assert_eq!(versions.len(), 2);
    let meta = cache.get(&ConfigKey::new("automations.yaml", "a1")).unwrap();
    assert_eq!(meta.backup_count, 2);
    assert_eq!(meta.backups_size, 2 * "id: a1\n".len() as u64);
    assert_eq!(meta.last_captured, at(5));
    assert_eq!(meta.display_name, "Kitchen v5");
    assert_eq!(meta.backup_type, BackupType::Multiple);
}

#[test]
fn target_override_beats_default_retention() {
    let tmp = tempfile::tempdir().unwrap();
    let (w, store, _) = worker(tmp.path(), RetentionPolicy { max_count: Some(10), max_age_days: None });
    let t = Arc::new(Target {
        name: "config".into(),
        group: "configuration.yaml".into(),
        strategy: BackupStrategy::Single,
        retention: RetentionPolicy { max_count: Some(1), max_age_days: None },
    });
    for day in 1..=3 {
        w.process_at(&job(&t, "configuration.yaml", "config", "a: 1\n", at(day)), at(4));
    }
    assert_eq!(store.list_versions("configuration.yaml", "configuration.yaml").unwrap().len(), 1);
}

#[test]
fn worker_reports_write_failure() {
    let tmp = tempfile::tempdir().unwrap();
    let (w, _, cache) = worker(tmp.path(), RetentionPolicy::default());
    let t = automations();
    let state = w.process_at(&job(&t, "..", "bad", "x: 1\n", at(1)), at(1));
    assert_eq!(state, JobState::WriteFailed);
    assert!(cache.is_empty());
}

#[test]
fn age_retention_can_empty_the_entry() {
    let tmp = tempfile::tempdir().unwrap();
    let (w, store, cache) = worker(tmp.path(), RetentionPolicy { max_count: None, max_age_days: Some(1) });
    let t = automations();
    let state = w.process_at(&job(&t, "a1", "Kitchen", "id: a1\n", at(1)), at(20));
    assert_eq!(state, JobState::MetadataPublished);
    assert!(cache.get(&ConfigKey::new("automations.yaml", "a1")).is_none());
    assert!(!store.entry_dir("automations.yaml", "a1").unwrap().exists());
}

#[tokio::test]
async fn flush_waits_for_prior_jobs() {
    let tmp = tempfile::tempdir().unwrap();
    let (w, store, cache) = worker(tmp.path(), RetentionPolicy::default());
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let handle = w.spawn(rx);
    let t = automations();
    for day in 1..=3 {
        tx.send(QueueItem::Capture(job(&t, "a1", "Kitchen", "id: a1\n", at(day)))).unwrap();
    }
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    tx.send(QueueItem::Flush(done_tx)).unwrap();
    done_rx.await.unwrap();
    assert_eq!(store.list_versions("automations.yaml", "a1").unwrap().len(), 3);
    assert_eq!(cache.get(&ConfigKey::new("automations.yaml", "a1")).unwrap().backup_count, 3);

    drop(tx);
    handle.await.unwrap();
}
