// tests/admission.rs

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use workshop_jobs::admission::AdmissionController;
use workshop_jobs::clock::{Clock, ManualClock};
use workshop_jobs::{DenialReason, IdentityId, Limits};

fn controller_at(
    y: i32,
    mo: u32,
    d: u32,
    h: u32,
    mi: u32,
    s: u32,
) -> (AdmissionController, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap(),
    ));
    (AdmissionController::new(clock.clone()), clock)
}

#[test]
fn concurrency_limit_denies_until_release() {
    let (ctl, _clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_max_concurrent(2);

    let t1 = ctl.try_acquire(&alice, limits).unwrap();
    let _t2 = ctl.try_acquire(&alice, limits).unwrap();
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::ConcurrencyExceeded
    );
    assert_eq!(ctl.in_flight(&alice), 2);

    assert!(ctl.release(&t1));
    assert_eq!(ctl.in_flight(&alice), 1);
    assert!(ctl.try_acquire(&alice, limits).is_ok());
}

#[test]
fn release_is_idempotent() {
    let (ctl, _clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_max_concurrent(1);

    let t1 = ctl.try_acquire(&alice, limits).unwrap();
    let _t2_denied = ctl.try_acquire(&alice, limits).unwrap_err();

    assert!(ctl.release(&t1));
    assert!(!ctl.release(&t1), "second release must be a no-op");
    assert_eq!(ctl.in_flight(&alice), 0);

    // Only one slot was freed; the double release did not create a second.
    let _t3 = ctl.try_acquire(&alice, limits).unwrap();
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::ConcurrencyExceeded
    );
}

#[test]
fn identities_are_isolated() {
    let (ctl, _clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let limits = Limits::unbounded().with_max_concurrent(1);

    let _a = ctl.try_acquire(&IdentityId::new("alice"), limits).unwrap();
    assert!(ctl.try_acquire(&IdentityId::new("bob"), limits).is_ok());
}

#[test]
fn rate_limit_uses_sliding_minute() {
    let (ctl, clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_rate_per_minute(2);

    let t1 = ctl.try_acquire(&alice, limits).unwrap();
    clock.advance(Duration::seconds(30));
    let t2 = ctl.try_acquire(&alice, limits).unwrap();
    ctl.release(&t1);
    ctl.release(&t2);

    // Releasing does not give back rate budget.
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::RateExceeded
    );

    // The first acquisition falls out of the window after 60s.
    clock.advance(Duration::seconds(30));
    assert!(ctl.try_acquire(&alice, limits).is_ok());
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::RateExceeded
    );
}

#[test]
fn denied_attempts_do_not_consume_budget() {
    let (ctl, clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_max_concurrent(1).with_quota_daily(2);

    let t1 = ctl.try_acquire(&alice, limits).unwrap();
    for _ in 0..5 {
        assert_eq!(
            ctl.try_acquire(&alice, limits).unwrap_err(),
            DenialReason::ConcurrencyExceeded
        );
    }
    ctl.release(&t1);
    clock.advance(Duration::seconds(1));

    assert!(ctl.try_acquire(&alice, limits).is_ok());
    assert_eq!(ctl.usage(&alice).today, 2);
}

#[test]
fn daily_quota_resets_at_utc_midnight() {
    let (ctl, clock) = controller_at(2024, 5, 10, 23, 59, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_quota_daily(1);

    let t = ctl.try_acquire(&alice, limits).unwrap();
    ctl.release(&t);
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::QuotaDailyExceeded
    );

    clock.advance(Duration::seconds(61));
    assert!(ctl.try_acquire(&alice, limits).is_ok());
}

#[test]
fn monthly_quota_resets_on_first_of_month() {
    let (ctl, clock) = controller_at(2024, 1, 31, 22, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_quota_monthly(2);

    for _ in 0..2 {
        let t = ctl.try_acquire(&alice, limits).unwrap();
        ctl.release(&t);
    }
    assert_eq!(
        ctl.try_acquire(&alice, limits).unwrap_err(),
        DenialReason::QuotaMonthlyExceeded
    );
    assert_eq!(ctl.usage(&alice).this_month, 2);

    clock.set(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap());
    assert!(ctl.try_acquire(&alice, limits).is_ok());
    assert_eq!(ctl.usage(&alice).this_month, 1);
}

#[test]
fn checks_run_in_order() {
    let (ctl, _clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let open = Limits::unbounded();
    let _t = ctl.try_acquire(&alice, open).unwrap();

    // Every limit is exhausted; concurrency is reported first.
    let all = Limits::unbounded()
        .with_max_concurrent(1)
        .with_rate_per_minute(1)
        .with_quota_daily(1)
        .with_quota_monthly(1);
    assert_eq!(
        ctl.try_acquire(&alice, all).unwrap_err(),
        DenialReason::ConcurrencyExceeded
    );

    let no_concurrency = Limits {
        max_concurrent: None,
        ..all
    };
    assert_eq!(
        ctl.try_acquire(&alice, no_concurrency).unwrap_err(),
        DenialReason::RateExceeded
    );

    let quotas_only = Limits::unbounded().with_quota_daily(1).with_quota_monthly(1);
    assert_eq!(
        ctl.try_acquire(&alice, quotas_only).unwrap_err(),
        DenialReason::QuotaDailyExceeded
    );
}

#[test]
fn ticket_carries_identity_and_limits() {
    let (ctl, clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_max_concurrent(3);

    let t = ctl.try_acquire(&alice, limits).unwrap();
    assert_eq!(t.identity(), &alice);
    assert_eq!(t.limits(), &limits);
    assert_eq!(t.acquired_at(), clock.now());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_acquires_never_exceed_limit() {
    let (ctl, _clock) = controller_at(2024, 5, 10, 12, 0, 0);
    let ctl = Arc::new(ctl);
    let alice = IdentityId::new("alice");
    let limits = Limits::unbounded().with_max_concurrent(3);

    let mut handles = Vec::new();
    for _ in 0..32 {
        let ctl = Arc::clone(&ctl);
        let alice = alice.clone();
        handles.push(tokio::spawn(async move { ctl.try_acquire(&alice, limits) }));
    }

    let mut granted = Vec::new();
    for h in handles {
        if let Ok(ticket) = h.await.unwrap() {
            granted.push(ticket);
        }
    }

    assert_eq!(granted.len(), 3);
    assert_eq!(ctl.in_flight(&alice), 3);
}
