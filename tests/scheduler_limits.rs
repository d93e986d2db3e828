// tests/scheduler_limits.rs
#![cfg(unix)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use workshop_jobs::clock::ManualClock;
use workshop_jobs::hub::JobEvent;
use workshop_jobs::limits::StaticLimitsProvider;
use workshop_jobs::{DenialReason, IdentityId, JobScheduler, JobStatus, Limits, SubmitError};
use workshop_jobs_test_utils::builders::EngineConfigBuilder;
use workshop_jobs_test_utils::harness::Harness;
use workshop_jobs_test_utils::store::FailingStore;
use workshop_jobs_test_utils::tool::ToolScript;
use workshop_jobs_test_utils::{drain, init_tracing, with_timeout};

#[tokio::test]
async fn second_job_over_concurrency_limit_is_denied_and_recorded() {
    init_tracing();
    let h = Harness::builder(ToolScript::sleeping(30))
        .limits(StaticLimitsProvider::new(
            Limits::unbounded().with_max_concurrent(1),
        ))
        .build();
    let alice = IdentityId::new("alice");

    let first = h.scheduler.submit(alice.clone(), "1").await.unwrap();

    let err = h.scheduler.submit(alice.clone(), "2").await.unwrap_err();
    assert_eq!(err.denial_reason(), Some(DenialReason::ConcurrencyExceeded));
    assert!(matches!(
        err,
        SubmitError::AdmissionDenied(DenialReason::ConcurrencyExceeded)
    ));

    // The refused job is on record with its reason, and never started.
    let failed = h.scheduler.list_jobs(JobStatus::Failed).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].target(), "2");
    assert_eq!(failed[0].error_message(), Some("CONCURRENCY_EXCEEDED"));
    assert!(failed[0].started_at().is_none());
    let denied_audit: Vec<_> = h
        .audit
        .events_for(failed[0].id())
        .into_iter()
        .map(|e| e.kind.name())
        .collect();
    assert_eq!(denied_audit, vec!["submitted", "denied"]);

    // Other identities are unaffected.
    let bob_job = h.scheduler.submit("bob".into(), "3").await.unwrap();

    // Finishing the first job frees the slot.
    h.scheduler.cancel_job(first, &alice).await.unwrap();
    with_timeout(h.scheduler.wait_for_terminal(first)).await.unwrap();
    let third = h.scheduler.submit(alice.clone(), "4").await.unwrap();

    h.scheduler.cancel_job(bob_job, &"bob".into()).await.unwrap();
    h.scheduler.cancel_job(third, &alice).await.unwrap();
    with_timeout(h.scheduler.shutdown()).await;
}

#[tokio::test]
async fn denial_is_reported_even_if_it_cannot_be_persisted() {
    let tool = ToolScript::success();
    // First save records QUEUED, the second would record the denial.
    let store = Arc::new(FailingStore::failing_save(2));
    let scheduler = JobScheduler::builder(EngineConfigBuilder::for_tool(&tool).build())
        .store(store.clone())
        .build();
    let alice = IdentityId::new("alice");

    let err = scheduler
        .submit_job(alice.clone(), "1", Limits::unbounded().with_max_concurrent(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SubmitError::AdmissionDenied(DenialReason::ConcurrencyExceeded)
    ));
    assert_eq!(store.saves(), 2);
    assert_eq!(scheduler.admission().in_flight(&alice), 0);
}

#[tokio::test]
async fn identity_override_raises_limit() {
    let h = Harness::builder(ToolScript::sleeping(30))
        .limits(
            StaticLimitsProvider::new(Limits::unbounded().with_max_concurrent(1))
                .with_override("premium", Limits::unbounded().with_max_concurrent(2)),
        )
        .build();

    h.scheduler.submit("premium".into(), "1").await.unwrap();
    h.scheduler.submit("premium".into(), "2").await.unwrap();
    let err = h.scheduler.submit("premium".into(), "3").await.unwrap_err();
    assert_eq!(err.denial_reason(), Some(DenialReason::ConcurrencyExceeded));

    with_timeout(h.scheduler.shutdown()).await;
}

#[tokio::test]
async fn rate_and_daily_quota_apply_per_submission() {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 6, 1, 23, 58, 0).unwrap(),
    ));
    let h = Harness::builder(ToolScript::success())
        .clock(clock.clone())
        .build();
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_rate_per_minute(2).with_quota_daily(3);

    for target in ["1", "2"] {
        let id = h.scheduler.submit_job(alice.clone(), target, limits).await.unwrap();
        with_timeout(h.scheduler.wait_for_terminal(id)).await.unwrap();
    }
    let err = h.scheduler.submit_job(alice.clone(), "3", limits).await.unwrap_err();
    assert_eq!(err.denial_reason(), Some(DenialReason::RateExceeded));

    // The first two fall out of the rate window; the daily quota has one left.
    clock.advance(Duration::seconds(60));
    let id = h.scheduler.submit_job(alice.clone(), "4", limits).await.unwrap();
    with_timeout(h.scheduler.wait_for_terminal(id)).await.unwrap();

    let err = h.scheduler.submit_job(alice.clone(), "5", limits).await.unwrap_err();
    assert_eq!(err.denial_reason(), Some(DenialReason::QuotaDailyExceeded));
    assert_eq!(h.scheduler.admission().usage(&alice).today, 3);

    // Next UTC day.
    clock.set(Utc.with_ymd_and_hms(2024, 6, 2, 0, 0, 30).unwrap());
    let id = h.scheduler.submit_job(alice.clone(), "6", limits).await.unwrap();
    let record = with_timeout(h.scheduler.wait_for_terminal(id)).await.unwrap();
    assert_eq!(record.status(), JobStatus::Succeeded);
    assert_eq!(h.scheduler.admission().usage(&alice).today, 1);
}

#[tokio::test]
async fn slow_subscriber_is_dropped_and_job_still_completes() {
    init_tracing();
    let h = Harness::builder(ToolScript::chatty(100))
        .config(|c| c.subscriber_buffer(10))
        .build();

    let job_id = h.scheduler.submit("alice".into(), "1").await.unwrap();
    // Subscribed, never read while the job runs.
    let slow = h.scheduler.subscribe_progress(job_id).await.unwrap();

    let record = with_timeout(h.scheduler.wait_for_terminal(job_id)).await.unwrap();
    assert_eq!(record.status(), JobStatus::Succeeded);
    assert_eq!(record.progress(), 1.0);

    let events = with_timeout(drain(slow)).await;
    assert_eq!(events.len(), 10, "buffered events only");
    assert!(events.iter().all(|e| matches!(e, JobEvent::Progress(_))));
    assert_eq!(h.scheduler.hub().subscriber_count(job_id), 0);
}
