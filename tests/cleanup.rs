// tests/cleanup.rs

use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};
use workshop_jobs::cleanup::{CleanupEntry, CleanupQueue, purge};
use workshop_jobs::{JobId, JobStatus};

fn entry(workdir: PathBuf, delete_after: chrono::DateTime<Utc>) -> CleanupEntry {
    CleanupEntry {
        job_id: JobId::new(),
        status: JobStatus::Succeeded,
        artifact_path: Some(workdir.join("content")),
        workdir,
        delete_after,
    }
}

#[test]
fn take_due_only_returns_expired_entries() {
    let t0 = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
    let queue = CleanupQueue::new();
    queue.enqueue(entry("/w/a".into(), t0));
    queue.enqueue(entry("/w/b".into(), t0 + Duration::hours(1)));
    queue.enqueue(entry("/w/c".into(), t0 + Duration::days(1)));
    assert_eq!(queue.len(), 3);

    let due = queue.take_due(t0 + Duration::hours(1));
    let dirs: Vec<_> = due.iter().map(|e| e.workdir.clone()).collect();
    assert_eq!(dirs, vec![PathBuf::from("/w/a"), PathBuf::from("/w/b")]);
    assert_eq!(queue.len(), 1);

    assert!(queue.take_due(t0 + Duration::hours(2)).is_empty());
    assert_eq!(queue.take_due(t0 + Duration::days(2)).len(), 1);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn purge_removes_workdir_and_tolerates_missing() {
    let root = tempfile::tempdir().unwrap();
    let workdir = root.path().join("job");
    std::fs::create_dir_all(workdir.join("content")).unwrap();
    std::fs::write(workdir.join("content/item.bin"), b"data").unwrap();

    let e = entry(workdir.clone(), Utc::now());
    purge(&e).await.unwrap();
    assert!(!workdir.exists());

    // Second purge: nothing left, still fine.
    purge(&e).await.unwrap();
}
