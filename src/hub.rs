// src/hub.rs

//! Fan-out of per-job progress to live subscribers.
//!
//! Every subscriber owns a bounded mpsc queue. Publishing never waits: a
//! subscriber whose queue is full is dropped (its receiver drains what was
//! already queued, then ends without a terminal marker) and the remaining
//! subscribers and the publishing job carry on.
//!
//! One slot of each queue is held back so the terminal marker always fits;
//! subscribers that kept up therefore always see [`JobEvent::Finished`] last.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::job::JobRecord;
use crate::progress::ProgressEvent;
use crate::types::{JobId, JobStatus};

/// Terminal marker delivered once per subscriber when a job ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFinished {
    pub job_id: JobId,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub artifact_path: Option<PathBuf>,
}

impl JobFinished {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            job_id: record.id(),
            status: record.status(),
            error_message: record.error_message().map(str::to_string),
            artifact_path: record.artifact_path().map(|p| p.to_path_buf()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Progress(ProgressEvent),
    Finished(JobFinished),
}

/// Receiving end handed to one observer.
#[derive(Debug)]
pub struct Subscription {
    job_id: JobId,
    rx: mpsc::Receiver<JobEvent>,
}

impl Subscription {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Next event, or `None` once the sequence is closed.
    pub async fn next(&mut self) -> Option<JobEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::next`].
    pub fn try_next(&mut self) -> Option<JobEvent> {
        self.rx.try_recv().ok()
    }

    /// Already closed, carrying only `finished`.
    pub(crate) fn terminal(finished: JobFinished) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let job_id = finished.job_id;
        // Capacity 1 on a fresh channel: cannot fail.
        let _ = tx.try_send(JobEvent::Finished(finished));
        Self { job_id, rx }
    }

    /// Already closed and empty.
    pub(crate) fn closed(job_id: JobId) -> Self {
        let (_tx, rx) = mpsc::channel(1);
        Self { job_id, rx }
    }
}

#[derive(Debug)]
struct Subscriber {
    id: u64,
    tx: mpsc::Sender<JobEvent>,
}

#[derive(Debug, Default)]
struct HubState {
    open: HashMap<JobId, Vec<Subscriber>>,
    finished: HashMap<JobId, JobFinished>,
    finished_order: VecDeque<JobId>,
    next_subscriber: u64,
}

#[derive(Debug)]
pub struct ProgressHub {
    state: Mutex<HubState>,
    buffer: usize,
    retained_terminal: usize,
}

impl ProgressHub {
    /// `buffer` is the number of progress events a subscriber may fall
    /// behind before it is dropped.
    pub fn new(buffer: usize, retained_terminal: usize) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            buffer: buffer.max(1),
            retained_terminal,
        }
    }

    /// Start accepting subscribers for `job_id`.
    pub fn open(&self, job_id: JobId) {
        self.state.lock().open.entry(job_id).or_default();
    }

    /// Attach a subscriber.
    ///
    /// Returns `None` if the hub knows nothing about `job_id`: never opened,
    /// or closed so long ago its terminal marker was evicted.
    pub fn subscribe(&self, job_id: JobId) -> Option<Subscription> {
        let mut state = self.state.lock();

        if let Some(finished) = state.finished.get(&job_id) {
            return Some(Subscription::terminal(finished.clone()));
        }

        let id = state.next_subscriber;
        let subscribers = state.open.get_mut(&job_id)?;
        let (tx, rx) = mpsc::channel(self.buffer + 1);
        subscribers.push(Subscriber { id, tx });
        let count = subscribers.len();
        state.next_subscriber += 1;

        debug!(job_id = %job_id, subscriber = id, subscribers = count, "subscriber attached");
        Some(Subscription { job_id, rx })
    }

    /// Deliver `event` to every subscriber of its job without waiting.
    pub fn publish(&self, event: ProgressEvent) {
        let mut state = self.state.lock();
        let Some(subscribers) = state.open.get_mut(&event.job_id) else {
            return;
        };

        subscribers.retain(|sub| {
            if sub.tx.is_closed() {
                debug!(job_id = %event.job_id, subscriber = sub.id, "subscriber detached");
                return false;
            }
            // Keep one slot free for the terminal marker.
            if sub.tx.capacity() <= 1 {
                warn!(
                    job_id = %event.job_id,
                    subscriber = sub.id,
                    seq = event.seq,
                    "subscriber buffer full; dropping subscriber"
                );
                return false;
            }
            sub.tx.try_send(JobEvent::Progress(event.clone())).is_ok()
        });
    }

    /// Send the terminal marker to every subscriber and close the job's
    /// channel. Later subscribers receive the marker straight away.
    pub fn close(&self, finished: JobFinished) {
        let mut state = self.state.lock();
        let job_id = finished.job_id;

        if let Some(subscribers) = state.open.remove(&job_id) {
            for sub in subscribers {
                if sub.tx.try_send(JobEvent::Finished(finished.clone())).is_err() {
                    debug!(job_id = %job_id, subscriber = sub.id, "terminal marker not delivered");
                }
            }
        }

        if self.retained_terminal == 0 {
            return;
        }
        if state.finished.insert(job_id, finished).is_none() {
            state.finished_order.push_back(job_id);
        }
        while state.finished_order.len() > self.retained_terminal {
            if let Some(old) = state.finished_order.pop_front() {
                state.finished.remove(&old);
            }
        }
    }

    /// Live subscriber count for `job_id`.
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.state
            .lock()
            .open
            .get(&job_id)
            .map(|subs| subs.iter().filter(|s| !s.tx.is_closed()).count())
            .unwrap_or(0)
    }
}
