// src/job/record.rs

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{JobsError, Result};
use crate::types::{IdentityId, JobId, JobStatus};

/// How a job ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TerminalOutcome {
    Succeeded { artifact_path: PathBuf },
    Failed { message: String },
    Cancelled { message: String },
}

impl TerminalOutcome {
    pub fn status(&self) -> JobStatus {
        match self {
            TerminalOutcome::Succeeded { .. } => JobStatus::Succeeded,
            TerminalOutcome::Failed { .. } => JobStatus::Failed,
            TerminalOutcome::Cancelled { .. } => JobStatus::Cancelled,
        }
    }
}

/// Persisted state of one download job.
///
/// `started_at` is set exactly once, on `QUEUED -> RUNNING`; a job that was
/// refused before launch keeps it `None`. `completed_at` is set exactly once,
/// on the transition into a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    id: JobId,
    identity_id: IdentityId,
    target: String,
    status: JobStatus,
    progress: f64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    artifact_path: Option<PathBuf>,
}

impl JobRecord {
    /// Create a fresh `QUEUED` record.
    pub fn new(identity_id: IdentityId, target: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: JobId::new(),
            identity_id,
            target: target.into(),
            status: JobStatus::Queued,
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            error_message: None,
            artifact_path: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn identity_id(&self) -> &IdentityId {
        &self.identity_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn artifact_path(&self) -> Option<&Path> {
        self.artifact_path.as_deref()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// `QUEUED -> RUNNING`.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != JobStatus::Queued {
            return Err(self.invalid(JobStatus::Running));
        }
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        Ok(())
    }

    /// Raise the progress fraction. Returns `true` if the stored value changed.
    ///
    /// Lower values are ignored, and nothing changes unless the job is
    /// `RUNNING`.
    pub fn advance_progress(&mut self, fraction: f64) -> bool {
        if self.status != JobStatus::Running || !fraction.is_finite() {
            return false;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        if fraction > self.progress {
            self.progress = fraction;
            true
        } else {
            false
        }
    }

    /// Commit the terminal transition.
    ///
    /// `FAILED` is reachable from `QUEUED` (refused before launch) and from
    /// `RUNNING`; `SUCCEEDED` and `CANCELLED` only from `RUNNING`. A record
    /// that is already terminal is never touched again.
    pub fn finish(&mut self, outcome: TerminalOutcome, now: DateTime<Utc>) -> Result<()> {
        let to = outcome.status();
        let allowed = match (self.status, &outcome) {
            (JobStatus::Running, _) => true,
            (JobStatus::Queued, TerminalOutcome::Failed { .. }) => true,
            _ => false,
        };
        if !allowed {
            return Err(self.invalid(to));
        }

        match outcome {
            TerminalOutcome::Succeeded { artifact_path } => {
                self.progress = 1.0;
                self.artifact_path = Some(artifact_path);
            }
            TerminalOutcome::Failed { message } | TerminalOutcome::Cancelled { message } => {
                self.error_message = Some(message);
            }
        }
        self.status = to;
        self.completed_at = Some(now);
        Ok(())
    }

    fn invalid(&self, to: JobStatus) -> JobsError {
        JobsError::InvalidTransition {
            job_id: self.id,
            from: self.status,
            to,
        }
    }
}
