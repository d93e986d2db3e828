// src/types.rs

//! Small value types shared across the crate.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque unique identifier of a job, assigned at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

/// The authenticated actor (user or API key) a job runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    pub fn new(id: impl Into<String>) -> Self {
        IdentityId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        IdentityId(s.to_string())
    }
}

impl From<String> for IdentityId {
    fn from(s: String) -> Self {
        IdentityId(s)
    }
}

/// Lifecycle status of a job.
///
/// `Succeeded`, `Failed` and `Cancelled` are terminal: no further
/// transitions occur once one of them is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Succeeded => "SUCCEEDED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Per-identity limits snapshot. `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default)]
    pub max_concurrent: Option<u32>,
    #[serde(default)]
    pub rate_per_minute: Option<u32>,
    #[serde(default)]
    pub quota_daily: Option<u64>,
    #[serde(default)]
    pub quota_monthly: Option<u64>,
}

impl Limits {
    /// No limits at all.
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent(mut self, n: u32) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    pub fn with_rate_per_minute(mut self, n: u32) -> Self {
        self.rate_per_minute = Some(n);
        self
    }

    pub fn with_quota_daily(mut self, n: u64) -> Self {
        self.quota_daily = Some(n);
        self
    }

    pub fn with_quota_monthly(mut self, n: u64) -> Self {
        self.quota_monthly = Some(n);
        self
    }

    /// Overlay `other` on top of `self`: fields set in `other` win.
    pub fn overlay(self, other: Limits) -> Limits {
        Limits {
            max_concurrent: other.max_concurrent.or(self.max_concurrent),
            rate_per_minute: other.rate_per_minute.or(self.rate_per_minute),
            quota_daily: other.quota_daily.or(self.quota_daily),
            quota_monthly: other.quota_monthly.or(self.quota_monthly),
        }
    }
}

/// Why admission refused to start a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DenialReason {
    ConcurrencyExceeded,
    RateExceeded,
    QuotaDailyExceeded,
    QuotaMonthlyExceeded,
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DenialReason::ConcurrencyExceeded => "CONCURRENCY_EXCEEDED",
            DenialReason::RateExceeded => "RATE_EXCEEDED",
            DenialReason::QuotaDailyExceeded => "QUOTA_DAILY_EXCEEDED",
            DenialReason::QuotaMonthlyExceeded => "QUOTA_MONTHLY_EXCEEDED",
        };
        f.write_str(s)
    }
}

/// Log level as accepted in the `[logging]` config section.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!(
                "invalid log level: {other} (expected error, warn, info, debug or trace)"
            )),
        }
    }
}
