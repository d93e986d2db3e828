// tests/scheduler_lifecycle.rs
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use workshop_jobs::audit::{LifecycleKind, MemoryAuditSink};
use workshop_jobs::hub::JobEvent;
use workshop_jobs::progress::Phase;
use workshop_jobs::store::JobStore;
use workshop_jobs::{IdentityId, JobId, JobScheduler, JobStatus, SubmitError};
use workshop_jobs_test_utils::builders::EngineConfigBuilder;
use workshop_jobs_test_utils::harness::Harness;
use workshop_jobs_test_utils::store::FailingStore;
use workshop_jobs_test_utils::tool::ToolScript;
use workshop_jobs_test_utils::{drain, init_tracing, with_timeout};

fn audit_names(h: &Harness, job_id: JobId) -> Vec<&'static str> {
    h.audit
        .events_for(job_id)
        .iter()
        .map(|e| e.kind.name())
        .collect()
}

#[tokio::test]
async fn successful_download_runs_to_completion() {
    init_tracing();
    let h = Harness::new(ToolScript::success());
    let alice = IdentityId::new("alice");

    let job_id = h.scheduler.submit(alice.clone(), "2503622437").await.unwrap();
    let sub = h.scheduler.subscribe_progress(job_id).await.unwrap();

    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();
    assert_eq!(record.status(), JobStatus::Succeeded);
    assert_eq!(record.progress(), 1.0);
    assert!(record.error_message().is_none());
    assert!(record.started_at().is_some());
    assert!(record.completed_at() >= record.started_at());
    assert!(record.started_at().unwrap() >= record.created_at());

    let artifact = record.artifact_path().unwrap().to_path_buf();
    assert_eq!(artifact, h.tool.workdir_for(job_id).join("content"));
    assert!(artifact.join("item.bin").exists());

    // The store holds the same final record.
    let stored = h.store.load(job_id).await.unwrap().unwrap();
    assert_eq!(stored, record);

    // Ticket returned.
    assert_eq!(h.scheduler.admission().in_flight(&alice), 0);
    assert!(h.scheduler.running_jobs().is_empty());

    assert_eq!(
        audit_names(&h, job_id),
        vec!["submitted", "started", "succeeded"]
    );

    let pending = h.scheduler.cleanup_queue().pending();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_id, job_id);
    assert_eq!(pending[0].workdir, h.tool.workdir_for(job_id));
    assert!(pending[0].delete_after > record.completed_at().unwrap());

    // Whatever the subscriber caught is ordered, monotonic and ends with
    // the terminal marker.
    let events = with_timeout(drain(sub)).await;
    let mut last_seq = 0;
    let mut last_progress = 0.0;
    for event in &events[..events.len() - 1] {
        match event {
            JobEvent::Progress(p) => {
                assert!(p.seq > last_seq);
                assert!(p.progress >= last_progress);
                last_seq = p.seq;
                last_progress = p.progress;
            }
            JobEvent::Finished(_) => panic!("terminal marker before the end"),
        }
    }
    match events.last() {
        Some(JobEvent::Finished(f)) => {
            assert_eq!(f.status, JobStatus::Succeeded);
            assert_eq!(f.artifact_path.as_deref(), Some(artifact.as_path()));
        }
        other => panic!("expected terminal marker, got {other:?}"),
    }
}

#[tokio::test]
async fn late_subscriber_gets_only_the_outcome() {
    let h = Harness::new(ToolScript::success());
    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();
    with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    let events = with_timeout(drain(h.scheduler.subscribe_progress(job_id).await.unwrap())).await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], JobEvent::Finished(f) if f.status == JobStatus::Succeeded));
}

#[tokio::test]
async fn unknown_job_yields_empty_progress_and_not_found() {
    let h = Harness::new(ToolScript::success());
    let unknown = JobId::new();

    let events = with_timeout(drain(h.scheduler.subscribe_progress(unknown).await.unwrap())).await;
    assert!(events.is_empty());
    assert!(h.scheduler.get_job(unknown).await.is_err());
}

#[tokio::test]
async fn nonzero_exit_fails_with_last_line() {
    init_tracing();
    let h = Harness::new(ToolScript::failing(5, "disk quota exceeded"));
    let alice = IdentityId::new("alice");

    let job_id = h.scheduler.submit(alice.clone(), "1").await.unwrap();
    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    assert_eq!(record.status(), JobStatus::Failed);
    let message = record.error_message().unwrap();
    assert!(message.contains("code 5"), "{message}");
    assert!(message.contains("disk quota exceeded"), "{message}");
    assert!(record.artifact_path().is_none());
    assert_eq!(h.scheduler.admission().in_flight(&alice), 0);
    assert_eq!(audit_names(&h, job_id), vec!["submitted", "started", "failed"]);
}

#[tokio::test]
async fn failure_marker_fails_job_even_on_exit_zero() {
    let h = Harness::new(ToolScript::failing(
        0,
        "ERROR! Download item 1 failed (Failure).",
    ));

    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();
    let sub = h.scheduler.subscribe_progress(job_id).await.unwrap();
    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(record.error_message(), Some("Download item 1 failed (Failure)."));

    let events = with_timeout(drain(sub)).await;
    assert!(matches!(
        events.last(),
        Some(JobEvent::Finished(f))
            if f.error_message.as_deref() == Some("Download item 1 failed (Failure).")
    ));
    // A subscriber that attached in time also saw the error phase.
    for event in &events {
        if let JobEvent::Progress(p) = event {
            if p.phase == Phase::Error {
                assert_eq!(p.message.as_deref(), Some("Download item 1 failed (Failure)."));
            }
        }
    }
}

#[tokio::test]
async fn exit_is_seen_while_a_descendant_keeps_output_open() {
    init_tracing();
    let h = Harness::new(ToolScript::leaves_child_running());

    let started = std::time::Instant::now();
    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();
    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    assert_eq!(record.status(), JobStatus::Succeeded);
    assert!(
        started.elapsed() < Duration::from_secs(5),
        "took {:?}",
        started.elapsed()
    );
    assert!(record.artifact_path().is_some());
    assert!(h.scheduler.running_jobs().is_empty());
}

#[tokio::test]
async fn storage_failure_when_starting_ends_the_job_failed() {
    init_tracing();
    let tool = ToolScript::sleeping(30);
    // First save records QUEUED, the second would record RUNNING.
    let store = Arc::new(FailingStore::failing_save(2));
    let audit = Arc::new(MemoryAuditSink::new());
    let scheduler = JobScheduler::builder(EngineConfigBuilder::for_tool(&tool).build())
        .store(store.clone())
        .audit(audit.clone())
        .build();
    let alice = IdentityId::new("alice");

    let err = scheduler.submit(alice.clone(), "1").await.unwrap_err();
    assert!(matches!(err, SubmitError::Storage(_)), "{err:?}");

    let failed = store.inner().list_by_status(JobStatus::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    let record = &failed[0];
    assert!(record.error_message().unwrap().contains("database unavailable"));
    assert!(record.completed_at().is_some());
    assert!(
        store
            .inner()
            .list_by_status(JobStatus::Queued)
            .await
            .unwrap()
            .is_empty()
    );

    assert_eq!(scheduler.admission().in_flight(&alice), 0);
    assert!(scheduler.running_jobs().is_empty());
    assert_eq!(scheduler.cleanup_queue().pending().len(), 1);
    let kinds: Vec<_> = audit
        .events_for(record.id())
        .iter()
        .map(|e| e.kind.name())
        .collect();
    assert_eq!(kinds, vec!["submitted", "failed"]);
}

#[tokio::test]
async fn clean_exit_without_artifact_fails() {
    let h = Harness::new(ToolScript::no_artifact());
    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();
    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    assert_eq!(record.status(), JobStatus::Failed);
    assert_eq!(
        record.error_message(),
        Some("download tool exited successfully but produced no artifact")
    );
}

#[tokio::test]
async fn launch_failure_is_reported_synchronously() {
    init_tracing();
    let tool = ToolScript::success();
    let store = Arc::new(workshop_jobs::store::InMemoryJobStore::new());
    let scheduler = JobScheduler::builder(
        EngineConfigBuilder::new("/definitely/not/steamcmd", tool.work_root()).build(),
    )
    .store(store.clone())
    .build();
    let alice = IdentityId::new("alice");

    let err = scheduler.submit(alice.clone(), "1").await.unwrap_err();
    let job_id = match err {
        SubmitError::ProcessLaunchFailed { job_id, message } => {
            assert!(message.contains("/definitely/not/steamcmd"), "{message}");
            job_id
        }
        other => panic!("Expected ProcessLaunchFailed, got: {other:?}"),
    };

    let record = scheduler.get_job(job_id).await.unwrap();
    assert_eq!(record.status(), JobStatus::Failed);
    assert!(record.started_at().is_none());
    assert!(record.completed_at().is_some());
    assert_eq!(scheduler.admission().in_flight(&alice), 0);
    assert!(scheduler.running_jobs().is_empty());
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn running_job_is_visible_and_progress_is_persisted() {
    init_tracing();
    let h = Harness::new(ToolScript::sleeping(30));
    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();

    assert_eq!(h.scheduler.running_jobs(), vec![job_id]);
    assert_eq!(
        h.scheduler.list_jobs(JobStatus::Running).await.unwrap().len(),
        1
    );

    // The tool reports 5% and then blocks.
    with_timeout(async {
        loop {
            let stored = h.store.load(job_id).await.unwrap().unwrap();
            if stored.progress() > 0.0 {
                assert_eq!(stored.status(), JobStatus::Running);
                assert_eq!(stored.progress(), 0.05);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    let live = h.scheduler.get_job(job_id).await.unwrap();
    assert_eq!(live.status(), JobStatus::Running);
    assert_eq!(live.progress(), 0.05);
    assert!(live.completed_at().is_none());

    h.scheduler.shutdown().await;
}

#[tokio::test]
async fn audit_events_carry_the_identity() {
    let h = Harness::new(ToolScript::success());
    let job_id = h.scheduler.submit("bob".into(), "77").await.unwrap();
    with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();

    let events = h.audit.events_for(job_id);
    assert!(events.iter().all(|e| e.identity.as_str() == "bob"));
    assert!(matches!(
        &events[0].kind,
        LifecycleKind::Submitted { target } if target == "77"
    ));
    assert!(events.windows(2).all(|w| w[0].at <= w[1].at));
}
