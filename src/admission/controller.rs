// src/admission/controller.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::admission::window::{CalendarCounter, Period, SlidingWindow};
use crate::clock::Clock;
use crate::types::{DenialReason, IdentityId, Limits};

/// Proof that a job was admitted. Held for the job's whole lifetime and
/// handed back through [`AdmissionController::release`].
#[derive(Debug)]
pub struct Ticket {
    id: u64,
    identity: IdentityId,
    acquired_at: DateTime<Utc>,
    limits: Limits,
}

impl Ticket {
    pub fn identity(&self) -> &IdentityId {
        &self.identity
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// The limits this ticket was checked against.
    pub fn limits(&self) -> &Limits {
        &self.limits
    }
}

/// Point-in-time view of one identity's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub in_flight: usize,
    pub last_minute: usize,
    pub today: u64,
    pub this_month: u64,
}

#[derive(Debug)]
struct IdentityCounters {
    in_flight: HashSet<u64>,
    rate: SlidingWindow,
    daily: CalendarCounter,
    monthly: CalendarCounter,
}

impl IdentityCounters {
    fn new() -> Self {
        Self {
            in_flight: HashSet::new(),
            rate: SlidingWindow::new(Duration::minutes(1)),
            daily: CalendarCounter::new(Period::Day),
            monthly: CalendarCounter::new(Period::Month),
        }
    }

    fn check(&mut self, limits: &Limits, now: DateTime<Utc>) -> Result<(), DenialReason> {
        if let Some(max) = limits.max_concurrent {
            if self.in_flight.len() >= max as usize {
                return Err(DenialReason::ConcurrencyExceeded);
            }
        }
        if let Some(rate) = limits.rate_per_minute {
            if self.rate.count(now) >= rate as usize {
                return Err(DenialReason::RateExceeded);
            }
        }
        if let Some(quota) = limits.quota_daily {
            if self.daily.current(now) >= quota {
                return Err(DenialReason::QuotaDailyExceeded);
            }
        }
        if let Some(quota) = limits.quota_monthly {
            if self.monthly.current(now) >= quota {
                return Err(DenialReason::QuotaMonthlyExceeded);
            }
        }
        Ok(())
    }
}

/// Decides whether an identity may start another job right now.
///
/// Each identity has its own lock; the outer map lock is only held long
/// enough to find or create that entry, so submissions for different
/// identities never contend on counter updates.
#[derive(Debug)]
pub struct AdmissionController {
    identities: Mutex<HashMap<IdentityId, Arc<Mutex<IdentityCounters>>>>,
    clock: Arc<dyn Clock>,
    next_ticket: AtomicU64,
}

impl AdmissionController {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            identities: Mutex::new(HashMap::new()),
            clock,
            next_ticket: AtomicU64::new(1),
        }
    }

    fn counters(&self, identity: &IdentityId) -> Arc<Mutex<IdentityCounters>> {
        let mut map = self.identities.lock();
        Arc::clone(
            map.entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(IdentityCounters::new()))),
        )
    }

    /// Check `limits` for `identity` and, if everything passes, take a slot.
    ///
    /// Rate and quota counters are only incremented on success.
    pub fn try_acquire(
        &self,
        identity: &IdentityId,
        limits: Limits,
    ) -> Result<Ticket, DenialReason> {
        let entry = self.counters(identity);
        let mut counters = entry.lock();
        let now = self.clock.now();

        if let Err(reason) = counters.check(&limits, now) {
            debug!(identity = %identity, %reason, "admission denied");
            return Err(reason);
        }

        let id = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        counters.in_flight.insert(id);
        counters.rate.record(now);
        counters.daily.increment(now);
        counters.monthly.increment(now);

        debug!(
            identity = %identity,
            ticket = id,
            in_flight = counters.in_flight.len(),
            "admission granted"
        );

        Ok(Ticket {
            id,
            identity: identity.clone(),
            acquired_at: now,
            limits,
        })
    }

    /// Give back the concurrency slot held by `ticket`.
    ///
    /// Returns `false` if the ticket was already released; a second release
    /// changes nothing.
    pub fn release(&self, ticket: &Ticket) -> bool {
        let entry = self.counters(&ticket.identity);
        let mut counters = entry.lock();
        let released = counters.in_flight.remove(&ticket.id);
        trace!(
            identity = %ticket.identity,
            ticket = ticket.id,
            released,
            "admission ticket release"
        );
        released
    }

    /// Number of jobs currently holding a ticket for `identity`.
    pub fn in_flight(&self, identity: &IdentityId) -> usize {
        let map = self.identities.lock();
        map.get(identity).map(|c| c.lock().in_flight.len()).unwrap_or(0)
    }

    pub fn usage(&self, identity: &IdentityId) -> Usage {
        let entry = {
            let map = self.identities.lock();
            match map.get(identity) {
                Some(e) => Arc::clone(e),
                None => return Usage::default(),
            }
        };
        let now = self.clock.now();
        let mut c = entry.lock();
        Usage {
            in_flight: c.in_flight.len(),
            last_minute: c.rate.count(now),
            today: c.daily.current(now),
            this_month: c.monthly.current(now),
        }
    }
}
