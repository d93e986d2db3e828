// src/engine/driver.rs

//! Per-job supervision task.
//!
//! One driver runs for every job that reached `RUNNING`. It owns the process
//! handle, the progress parser and the admission ticket, and it is the only
//! code that moves the job into a terminal status.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, trace, warn};

use crate::admission::Ticket;
use crate::audit::{LifecycleEvent, LifecycleKind};
use crate::cleanup::CleanupEntry;
use crate::engine::scheduler::Shared;
use crate::engine::slot::{JobSlot, StopCause};
use crate::errors::JobsError;
use crate::exec::{ExitStatus, OutputLine, ProcessEvent, ProcessHandle};
use crate::hub::JobFinished;
use crate::job::{JobRecord, TerminalOutcome};
use crate::progress::{ParsedLine, Phase, ProgressEvent, ProgressParser};
use crate::types::{JobId, JobStatus};

/// Why supervision ended before a natural exit was observed.
enum Interrupt {
    Stop(StopCause),
    Timeout,
    WaitFailed(JobsError),
}

pub(crate) struct JobDriver {
    shared: Arc<Shared>,
    slot: Arc<JobSlot>,
    job_id: JobId,
    handle: ProcessHandle,
    ticket: Ticket,
    parser: ProgressParser,
    workdir: PathBuf,
    destination: PathBuf,
    seq: u64,
    early_failure: Option<String>,
    last_line: Option<String>,
    persisted_progress: f64,
}

impl JobDriver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        slot: Arc<JobSlot>,
        handle: ProcessHandle,
        ticket: Ticket,
        workdir: PathBuf,
        destination: PathBuf,
    ) -> Self {
        let job_id = slot.snapshot().id();
        let parser = ProgressParser::new(Arc::clone(&shared.config.patterns));
        Self {
            shared,
            slot,
            job_id,
            handle,
            ticket,
            parser,
            workdir,
            destination,
            seq: 0,
            early_failure: None,
            last_line: None,
            persisted_progress: 0.0,
        }
    }

    pub(crate) async fn run(mut self) {
        let deadline = Instant::now() + self.shared.config.max_runtime;

        let supervised = self.supervise(deadline).await;
        // From here on the outcome is decided; later stop requests are refused.
        let pending_stop = self.slot.settle();

        let outcome = match supervised {
            Ok(status) => match pending_stop {
                Some(cause) => {
                    info!(
                        job_id = %self.job_id,
                        cause = ?cause,
                        ?status,
                        "stop requested as the tool exited"
                    );
                    TerminalOutcome::Cancelled {
                        message: cause.message(),
                    }
                }
                None => self.outcome_for_exit(status).await,
            },
            Err(Interrupt::Stop(cause)) => {
                info!(job_id = %self.job_id, cause = ?cause, "stopping download tool");
                self.stop_process().await;
                TerminalOutcome::Cancelled {
                    message: cause.message(),
                }
            }
            Err(Interrupt::Timeout) => {
                info!(
                    job_id = %self.job_id,
                    max_runtime = ?self.shared.config.max_runtime,
                    "job exceeded max runtime; killing download tool"
                );
                self.stop_process().await;
                TerminalOutcome::Cancelled {
                    message: "timeout".to_string(),
                }
            }
            Err(Interrupt::WaitFailed(e)) => {
                error!(job_id = %self.job_id, error = %e, "lost track of download tool");
                self.stop_process().await;
                TerminalOutcome::Failed {
                    message: format!("waiting for download tool failed: {e}"),
                }
            }
        };

        self.finish(outcome).await;
    }

    /// Consume output until the tool exits, racing the stop request and the
    /// deadline. The exit ends supervision even if a descendant still holds
    /// the pipes open.
    async fn supervise(&mut self, deadline: Instant) -> Result<ExitStatus, Interrupt> {
        let slot = Arc::clone(&self.slot);
        let timeout = sleep_until(deadline);
        tokio::pin!(timeout);

        let status = loop {
            let event = tokio::select! {
                biased;
                cause = slot.stop_requested() => return Err(Interrupt::Stop(cause)),
                _ = &mut timeout => return Err(Interrupt::Timeout),
                event = self.handle.next_event() => event.map_err(Interrupt::WaitFailed)?,
            };
            match event {
                ProcessEvent::Line(line) => self.on_line(line).await,
                ProcessEvent::Exited(status) => break status,
            }
        };

        self.drain_after_exit().await;
        Ok(status)
    }

    /// Kill whatever the tool left in its process group, then read the
    /// output still in flight. Bounded by the kill grace period.
    async fn drain_after_exit(&mut self) {
        if let Err(e) = self.handle.kill_descendants() {
            warn!(job_id = %self.job_id, error = %e, "failed to kill leftover tool processes");
        }

        let grace = self.shared.config.kill_grace;
        let drained = tokio::time::timeout(grace, async {
            while let Some(line) = self.handle.next_line().await {
                self.on_line(line).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                job_id = %self.job_id,
                ?grace,
                "tool output still open after exit; ignoring the rest"
            );
        }
    }

    async fn on_line(&mut self, line: OutputLine) {
        trace!(job_id = %self.job_id, stream = ?line.stream, "tool: {}", line.text);

        let parsed = self.parser.parse(&line.text);
        self.last_line = Some(line.text);

        match parsed {
            None => {}
            Some(ParsedLine::Failure(message)) => {
                if self.early_failure.is_none() {
                    warn!(job_id = %self.job_id, %message, "download tool reported failure");
                    self.early_failure = Some(message.clone());
                }
                let fraction = self.parser.last_fraction();
                self.publish(Phase::Error, fraction, Some(message));
            }
            Some(ParsedLine::Progress(update)) => {
                let advanced = self.slot.record.lock().advance_progress(update.fraction);
                debug!(
                    job_id = %self.job_id,
                    phase = ?update.phase,
                    progress = update.fraction,
                    "progress"
                );
                self.publish(update.phase, update.fraction, update.message);

                let step = self.shared.config.progress_persist_step;
                if advanced && update.fraction - self.persisted_progress >= step {
                    self.persist_progress().await;
                }
            }
        }
    }

    fn publish(&mut self, phase: Phase, progress: f64, message: Option<String>) {
        self.seq += 1;
        self.shared.hub.publish(ProgressEvent {
            job_id: self.job_id,
            seq: self.seq,
            phase,
            progress,
            message,
        });
    }

    async fn persist_progress(&mut self) {
        let snapshot = self.slot.snapshot();
        let progress = snapshot.progress();
        match self.shared.store.save(snapshot).await {
            Ok(()) => self.persisted_progress = progress,
            Err(e) => warn!(job_id = %self.job_id, error = %e, "failed to persist progress"),
        }
    }

    async fn outcome_for_exit(&mut self, status: ExitStatus) -> TerminalOutcome {
        info!(job_id = %self.job_id, ?status, "download tool exited");

        if let Some(message) = self.early_failure.take() {
            return TerminalOutcome::Failed { message };
        }

        match status {
            ExitStatus::Code(0) => {
                let present = tokio::fs::try_exists(&self.destination)
                    .await
                    .unwrap_or(false);
                if present {
                    TerminalOutcome::Succeeded {
                        artifact_path: self.destination.clone(),
                    }
                } else {
                    TerminalOutcome::Failed {
                        message: "download tool exited successfully but produced no artifact"
                            .to_string(),
                    }
                }
            }
            ExitStatus::Code(code) => TerminalOutcome::Failed {
                message: self.with_last_line(format!("download tool exited with code {code}")),
            },
            ExitStatus::Signaled(signal) => TerminalOutcome::Failed {
                message: self
                    .with_last_line(format!("download tool terminated by signal {signal}")),
            },
            ExitStatus::Killed => TerminalOutcome::Failed {
                message: "download tool was killed".to_string(),
            },
        }
    }

    fn with_last_line(&self, message: String) -> String {
        match &self.last_line {
            Some(line) => format!("{message}: {}", line.trim()),
            None => message,
        }
    }

    async fn stop_process(&mut self) {
        match self.handle.kill_and_wait(self.shared.config.kill_grace).await {
            Ok(status) => debug!(job_id = %self.job_id, ?status, "download tool stopped"),
            Err(e) => warn!(job_id = %self.job_id, error = %e, "failed to kill download tool"),
        }
    }

    /// Commit the terminal transition, then in order: close the progress
    /// channel, release the ticket, persist, hand files to cleanup, audit.
    async fn finish(self, outcome: TerminalOutcome) {
        let shared = &self.shared;
        let now = shared.clock.now();

        let record = {
            let mut record = self.slot.record.lock();
            if let Err(e) = record.finish(outcome, now) {
                // Only this driver writes terminal states.
                error!(job_id = %self.job_id, error = %e, "terminal transition refused");
                return;
            }
            record.clone()
        };

        info!(
            job_id = %self.job_id,
            identity = %record.identity_id(),
            status = %record.status(),
            error = ?record.error_message(),
            "job finished"
        );

        shared.hub.close(JobFinished::from_record(&record));
        shared.admission.release(&self.ticket);

        if let Err(e) = shared.store.save(record.clone()).await {
            error!(job_id = %self.job_id, error = %e, "failed to persist final job record");
        }

        shared.cleanup.enqueue(cleanup_entry(shared, &record, self.workdir.clone(), now));
        shared.audit.record(LifecycleEvent {
            job_id: self.job_id,
            identity: record.identity_id().clone(),
            at: now,
            kind: terminal_kind(&record),
        });

        shared.live.write().remove(&self.job_id);
        self.slot.publish_status(record.status());
    }
}

pub(crate) fn cleanup_entry(
    shared: &Shared,
    record: &JobRecord,
    workdir: PathBuf,
    now: DateTime<Utc>,
) -> CleanupEntry {
    let retention = match record.artifact_path() {
        Some(_) => shared.config.artifact_retention,
        None => shared.config.failed_retention,
    };
    let delete_after = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);

    CleanupEntry {
        job_id: record.id(),
        status: record.status(),
        artifact_path: record.artifact_path().map(|p| p.to_path_buf()),
        workdir,
        delete_after,
    }
}

pub(crate) fn terminal_kind(record: &JobRecord) -> LifecycleKind {
    let message = record.error_message().unwrap_or_default().to_string();
    match (record.status(), record.artifact_path()) {
        (JobStatus::Succeeded, Some(path)) => LifecycleKind::Succeeded {
            artifact_path: path.to_path_buf(),
        },
        (JobStatus::Cancelled, _) => LifecycleKind::Cancelled { message },
        _ => LifecycleKind::Failed { message },
    }
}
