// src/errors.rs

//! Crate-wide error types.

use thiserror::Error;

use crate::types::{DenialReason, JobId, JobStatus};

#[derive(Error, Debug)]
pub enum JobsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Process launch failed: {0}")]
    LaunchFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, JobsError>;

/// Synchronous outcome of a rejected submission.
#[derive(Error, Debug)]
pub enum SubmitError {
    #[error("admission denied: {0}")]
    AdmissionDenied(DenialReason),

    #[error("failed to launch download tool for job {job_id}: {message}")]
    ProcessLaunchFailed { job_id: JobId, message: String },

    #[error("storage error: {0}")]
    Storage(#[from] JobsError),
}

impl SubmitError {
    /// The denial reason, if this was an admission failure.
    pub fn denial_reason(&self) -> Option<DenialReason> {
        match self {
            SubmitError::AdmissionDenied(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Result of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The request was delivered to a running job.
    Cancelled,
    /// No running job with this id exists.
    NotFound,
    /// The job already reached a terminal status.
    AlreadyTerminal,
}
