// src/engine/slot.rs

//! Shared state of one live job.
//!
//! Cancellation requests and the driver meet in the stop state: once the
//! driver has settled on an outcome a request is refused, and a request
//! accepted before that decides the outcome. `Cancelled` therefore always
//! ends in `CANCELLED`.

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::errors::CancelOutcome;
use crate::job::JobRecord;
use crate::types::{IdentityId, JobStatus};

/// Why a running job is being stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StopCause {
    Requested { by: IdentityId },
    Shutdown,
}

impl StopCause {
    pub(crate) fn message(&self) -> String {
        match self {
            StopCause::Requested { by } => format!("cancelled by {by}"),
            StopCause::Shutdown => "scheduler shutdown".to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct StopState {
    cause: Option<StopCause>,
    settled: bool,
}

#[derive(Debug)]
pub(crate) struct JobSlot {
    pub(crate) record: Mutex<JobRecord>,
    stop: Mutex<StopState>,
    stop_notify: Notify,
    status_tx: watch::Sender<JobStatus>,
}

impl JobSlot {
    pub(crate) fn new(record: JobRecord) -> Self {
        let (status_tx, _) = watch::channel(record.status());
        Self {
            record: Mutex::new(record),
            stop: Mutex::new(StopState::default()),
            stop_notify: Notify::new(),
            status_tx,
        }
    }

    pub(crate) fn snapshot(&self) -> JobRecord {
        self.record.lock().clone()
    }

    /// Ask the driver to stop. The first cause wins.
    pub(crate) fn request_stop(&self, cause: StopCause) -> CancelOutcome {
        let status = self.record.lock().status();
        let mut stop = self.stop.lock();
        if stop.settled || status.is_terminal() {
            return CancelOutcome::AlreadyTerminal;
        }
        if status != JobStatus::Running {
            return CancelOutcome::NotFound;
        }
        if stop.cause.is_none() {
            stop.cause = Some(cause);
        }
        self.stop_notify.notify_one();
        CancelOutcome::Cancelled
    }

    /// Resolves once a stop was requested, with its cause.
    pub(crate) async fn stop_requested(&self) -> StopCause {
        loop {
            let current = self.stop.lock().cause.clone();
            if let Some(cause) = current {
                return cause;
            }
            self.stop_notify.notified().await;
        }
    }

    /// Close the slot to further stop requests. Returns the cause of a
    /// request that got in first, which then decides the outcome.
    pub(crate) fn settle(&self) -> Option<StopCause> {
        let mut stop = self.stop.lock();
        stop.settled = true;
        stop.cause.clone()
    }

    pub(crate) fn publish_status(&self, status: JobStatus) {
        self.status_tx.send_replace(status);
    }

    pub(crate) fn watch_status(&self) -> watch::Receiver<JobStatus> {
        self.status_tx.subscribe()
    }
}
