// src/engine/scheduler.rs

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::admission::{AdmissionController, Ticket};
use crate::audit::{AuditSink, LifecycleEvent, LifecycleKind, TracingAuditSink};
use crate::cleanup::CleanupQueue;
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::engine::driver::{JobDriver, cleanup_entry, terminal_kind};
use crate::engine::slot::{JobSlot, StopCause};
use crate::errors::{CancelOutcome, JobsError, Result, SubmitError};
use crate::exec::{CommandSpec, ProcessRunner};
use crate::hub::{JobFinished, ProgressHub, Subscription};
use crate::job::{JobRecord, TerminalOutcome};
use crate::limits::{LimitsProvider, StaticLimitsProvider};
use crate::store::{InMemoryJobStore, JobStore};
use crate::types::{IdentityId, JobId, JobStatus, Limits};

/// State shared between the scheduler handle and every job driver.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) admission: AdmissionController,
    pub(crate) hub: ProgressHub,
    pub(crate) store: Arc<dyn JobStore>,
    pub(crate) audit: Arc<dyn AuditSink>,
    pub(crate) limits: Arc<dyn LimitsProvider>,
    pub(crate) cleanup: CleanupQueue,
    pub(crate) runner: ProcessRunner,
    /// Jobs with a live driver, keyed by id.
    pub(crate) live: RwLock<HashMap<JobId, Arc<JobSlot>>>,
}

impl Shared {
    fn emit_audit(&self, record: &JobRecord, kind: LifecycleKind) {
        self.audit.record(LifecycleEvent {
            job_id: record.id(),
            identity: record.identity_id().clone(),
            at: self.clock.now(),
            kind,
        });
    }

    fn live_slot(&self, job_id: JobId) -> Option<Arc<JobSlot>> {
        self.live.read().get(&job_id).cloned()
    }
}

/// Builder for [`JobScheduler`]. Collaborators left unset default to an
/// in-memory store, the tracing audit sink, no limits and the system clock.
pub struct SchedulerBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn JobStore>,
    audit: Arc<dyn AuditSink>,
    limits: Arc<dyn LimitsProvider>,
}

impl SchedulerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = store;
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn limits(mut self, limits: Arc<dyn LimitsProvider>) -> Self {
        self.limits = limits;
        self
    }

    pub fn build(self) -> JobScheduler {
        let hub = ProgressHub::new(
            self.config.subscriber_buffer,
            self.config.retained_terminal_markers,
        );
        JobScheduler {
            shared: Arc::new(Shared {
                admission: AdmissionController::new(Arc::clone(&self.clock)),
                config: self.config,
                clock: self.clock,
                hub,
                store: self.store,
                audit: self.audit,
                limits: self.limits,
                cleanup: CleanupQueue::new(),
                runner: ProcessRunner,
                live: RwLock::new(HashMap::new()),
            }),
        }
    }
}

/// Accepts download jobs, runs each one under its own driver task, and
/// answers queries about them.
///
/// Cloning is cheap; all clones drive the same set of jobs. Independent
/// schedulers share nothing.
#[derive(Debug, Clone)]
pub struct JobScheduler {
    shared: Arc<Shared>,
}

impl JobScheduler {
    pub fn builder(config: EngineConfig) -> SchedulerBuilder {
        SchedulerBuilder {
            config,
            clock: Arc::new(SystemClock),
            store: Arc::new(InMemoryJobStore::new()),
            audit: Arc::new(TracingAuditSink),
            limits: Arc::new(StaticLimitsProvider::default()),
        }
    }

    /// Submit a job using the limits the provider resolves for `identity`.
    pub async fn submit(
        &self,
        identity: IdentityId,
        target: &str,
    ) -> std::result::Result<JobId, SubmitError> {
        let limits = self.shared.limits.limits_for(&identity);
        self.submit_job(identity, target, limits).await
    }

    /// Admit and launch a job against an explicit limits snapshot.
    ///
    /// Returns once the tool process is running. Admission and launch
    /// failures are reported here; anything later ends up on the job record
    /// and in the subscribers' terminal marker.
    pub async fn submit_job(
        &self,
        identity: IdentityId,
        target: &str,
        limits: Limits,
    ) -> std::result::Result<JobId, SubmitError> {
        let shared = &self.shared;
        let mut record = JobRecord::new(identity.clone(), target, shared.clock.now());
        let job_id = record.id();

        info!(job_id = %job_id, identity = %identity, target, "job submitted");
        shared.store.save(record.clone()).await?;
        shared.emit_audit(
            &record,
            LifecycleKind::Submitted {
                target: target.to_string(),
            },
        );

        let ticket = match shared.admission.try_acquire(&identity, limits) {
            Ok(ticket) => ticket,
            Err(reason) => {
                info!(job_id = %job_id, identity = %identity, %reason, "job refused by admission");
                record.finish(
                    TerminalOutcome::Failed {
                        message: reason.to_string(),
                    },
                    shared.clock.now(),
                )?;
                if let Err(e) = shared.store.save(record.clone()).await {
                    warn!(job_id = %job_id, error = %e, "failed to persist denied job");
                }
                shared.emit_audit(&record, LifecycleKind::Denied { reason });
                return Err(SubmitError::AdmissionDenied(reason));
            }
        };

        self.launch(record, ticket).await
    }

    async fn launch(
        &self,
        mut record: JobRecord,
        ticket: Ticket,
    ) -> std::result::Result<JobId, SubmitError> {
        let shared = &self.shared;
        let job_id = record.id();
        let workdir = shared.config.work_root.join(job_id.to_string());
        let destination = workdir.join("content");

        let started = match tokio::fs::create_dir_all(&workdir).await {
            Ok(()) => shared
                .runner
                .start(&tool_command(&shared.config, &workdir, record.target(), &destination)),
            Err(e) => Err(JobsError::LaunchFailed(format!(
                "creating work dir {:?}: {e}",
                workdir
            ))),
        };

        let mut handle = match started {
            Ok(handle) => handle,
            Err(e) => {
                let message = e.to_string();
                warn!(job_id = %job_id, error = %message, "download tool launch failed");
                shared.admission.release(&ticket);
                record.finish(
                    TerminalOutcome::Failed {
                        message: message.clone(),
                    },
                    shared.clock.now(),
                )?;
                shared.store.save(record.clone()).await?;
                shared
                    .cleanup
                    .enqueue(cleanup_entry(shared, &record, workdir, shared.clock.now()));
                shared.emit_audit(&record, terminal_kind(&record));
                return Err(SubmitError::ProcessLaunchFailed { job_id, message });
            }
        };

        record.mark_running(shared.clock.now())?;
        if let Err(e) = shared.store.save(record.clone()).await {
            warn!(job_id = %job_id, error = %e, "failed to persist running job; stopping tool");
            if let Err(kill_err) = handle.kill_and_wait(shared.config.kill_grace).await {
                warn!(job_id = %job_id, error = %kill_err, "failed to kill download tool");
            }
            shared.admission.release(&ticket);
            record.finish(
                TerminalOutcome::Failed {
                    message: format!("storage error: {e}"),
                },
                shared.clock.now(),
            )?;
            if let Err(save_err) = shared.store.save(record.clone()).await {
                warn!(job_id = %job_id, error = %save_err, "failed to persist failed job");
            }
            shared
                .cleanup
                .enqueue(cleanup_entry(shared, &record, workdir, shared.clock.now()));
            shared.emit_audit(&record, terminal_kind(&record));
            return Err(SubmitError::Storage(e));
        }

        let slot = Arc::new(JobSlot::new(record.clone()));
        shared.hub.open(job_id);
        shared.live.write().insert(job_id, Arc::clone(&slot));
        shared.emit_audit(&record, LifecycleKind::Started);

        info!(job_id = %job_id, pid = ?handle.pid(), "job running");

        let driver = JobDriver::new(
            Arc::clone(shared),
            slot,
            handle,
            ticket,
            workdir,
            destination,
        );
        tokio::spawn(driver.run());

        Ok(job_id)
    }

    /// Current record: the live one for running jobs, else the stored one.
    pub async fn get_job(&self, job_id: JobId) -> Result<JobRecord> {
        if let Some(slot) = self.shared.live_slot(job_id) {
            return Ok(slot.snapshot());
        }
        self.shared
            .store
            .load(job_id)
            .await?
            .ok_or(JobsError::JobNotFound(job_id))
    }

    /// Live progress for `job_id`.
    ///
    /// A finished job yields only its terminal marker; an unknown job yields
    /// an empty, closed sequence.
    pub async fn subscribe_progress(&self, job_id: JobId) -> Result<Subscription> {
        if let Some(sub) = self.shared.hub.subscribe(job_id) {
            return Ok(sub);
        }
        let sub = match self.shared.store.load(job_id).await? {
            Some(record) if record.is_terminal() => {
                Subscription::terminal(JobFinished::from_record(&record))
            }
            _ => Subscription::closed(job_id),
        };
        Ok(sub)
    }

    /// Request cancellation of a running job.
    ///
    /// `Cancelled` means the request reached the job's driver before it
    /// settled on an outcome; the job will end `CANCELLED`. A job whose
    /// driver is already committing its result reports `AlreadyTerminal`.
    /// Nothing is written here.
    pub async fn cancel_job(
        &self,
        job_id: JobId,
        requested_by: &IdentityId,
    ) -> Result<CancelOutcome> {
        if let Some(slot) = self.shared.live_slot(job_id) {
            let outcome = slot.request_stop(StopCause::Requested {
                by: requested_by.clone(),
            });
            info!(
                job_id = %job_id,
                requested_by = %requested_by,
                ?outcome,
                "cancellation requested"
            );
            return Ok(outcome);
        }

        let outcome = match self.shared.store.load(job_id).await? {
            Some(record) if record.is_terminal() => CancelOutcome::AlreadyTerminal,
            _ => CancelOutcome::NotFound,
        };
        debug!(job_id = %job_id, ?outcome, "cancellation for job without a live driver");
        Ok(outcome)
    }

    /// Wait until `job_id` is terminal and return the final record.
    ///
    /// For a job this scheduler is not supervising, the stored record is
    /// returned as is.
    pub async fn wait_for_terminal(&self, job_id: JobId) -> Result<JobRecord> {
        if let Some(slot) = self.shared.live_slot(job_id) {
            let mut status = slot.watch_status();
            // The sender lives in `slot`, which we hold.
            let _ = status.wait_for(|s| s.is_terminal()).await;
            return Ok(slot.snapshot());
        }
        self.get_job(job_id).await
    }

    pub async fn list_jobs(&self, status: JobStatus) -> Result<Vec<JobRecord>> {
        self.shared.store.list_by_status(status).await
    }

    /// Ids of jobs with a live driver.
    pub fn running_jobs(&self) -> Vec<JobId> {
        self.shared.live.read().keys().copied().collect()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.shared.admission
    }

    pub fn hub(&self) -> &ProgressHub {
        &self.shared.hub
    }

    pub fn cleanup_queue(&self) -> &CleanupQueue {
        &self.shared.cleanup
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Cancel every live job and wait for all of them to finish.
    pub async fn shutdown(&self) {
        let slots: Vec<(JobId, Arc<JobSlot>)> = self
            .shared
            .live
            .read()
            .iter()
            .map(|(id, slot)| (*id, Arc::clone(slot)))
            .collect();

        info!(jobs = slots.len(), "scheduler shutting down");

        for (_, slot) in &slots {
            slot.request_stop(StopCause::Shutdown);
        }
        for (job_id, slot) in slots {
            let mut status = slot.watch_status();
            let _ = status.wait_for(|s| s.is_terminal()).await;
            debug!(job_id = %job_id, "job stopped for shutdown");
        }
    }
}

/// `<tool> <args...> <target> <destination>`
fn tool_command(
    config: &EngineConfig,
    workdir: &Path,
    target: &str,
    destination: &Path,
) -> CommandSpec {
    let spec = config
        .tool_args
        .iter()
        .fold(CommandSpec::new(&config.tool_path, workdir), |spec, arg| {
            spec.arg(arg)
        });
    spec.arg(target).arg(destination.as_os_str())
}
