// src/admission/window.rs

//! Counters backing rate and quota checks.

use std::collections::VecDeque;

use chrono::{DateTime, Datelike, Duration, Utc};

/// Sliding window of acquisition instants.
#[derive(Debug, Clone)]
pub(crate) struct SlidingWindow {
    span: Duration,
    hits: VecDeque<DateTime<Utc>>,
}

impl SlidingWindow {
    pub(crate) fn new(span: Duration) -> Self {
        Self {
            span,
            hits: VecDeque::new(),
        }
    }

    /// Number of hits strictly inside `(now - span, now]`.
    pub(crate) fn count(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.span;
        while let Some(front) = self.hits.front() {
            if *front <= cutoff {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        self.hits.len()
    }

    pub(crate) fn record(&mut self, now: DateTime<Utc>) {
        self.hits.push_back(now);
    }
}

/// Calendar period a quota counter is bucketed by. Boundaries are UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Period {
    Day,
    Month,
}

impl Period {
    fn key(self, at: DateTime<Utc>) -> (i32, u32) {
        match self {
            Period::Day => (at.year(), at.ordinal()),
            Period::Month => (at.year(), at.month()),
        }
    }
}

/// Monotonic counter that starts from zero at each new period.
#[derive(Debug, Clone)]
pub(crate) struct CalendarCounter {
    period: Period,
    bucket: Option<(i32, u32)>,
    count: u64,
}

impl CalendarCounter {
    pub(crate) fn new(period: Period) -> Self {
        Self {
            period,
            bucket: None,
            count: 0,
        }
    }

    pub(crate) fn current(&mut self, now: DateTime<Utc>) -> u64 {
        let key = self.period.key(now);
        if self.bucket != Some(key) {
            self.bucket = Some(key);
            self.count = 0;
        }
        self.count
    }

    pub(crate) fn increment(&mut self, now: DateTime<Utc>) {
        self.current(now);
        self.count += 1;
    }
}
