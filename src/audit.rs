// src/audit.rs

//! Job lifecycle audit events and the sinks that accept them.

use std::fmt::Debug;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::info;

use crate::types::{DenialReason, IdentityId, JobId};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LifecycleKind {
    Submitted { target: String },
    Denied { reason: DenialReason },
    Started,
    Succeeded { artifact_path: PathBuf },
    Failed { message: String },
    Cancelled { message: String },
}

impl LifecycleKind {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleKind::Submitted { .. } => "submitted",
            LifecycleKind::Denied { .. } => "denied",
            LifecycleKind::Started => "started",
            LifecycleKind::Succeeded { .. } => "succeeded",
            LifecycleKind::Failed { .. } => "failed",
            LifecycleKind::Cancelled { .. } => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LifecycleEvent {
    pub job_id: JobId,
    pub identity: IdentityId,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: LifecycleKind,
}

pub trait AuditSink: Send + Sync + Debug {
    fn record(&self, event: LifecycleEvent);
}

/// Writes audit events to the `audit` tracing target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: LifecycleEvent) {
        let detail = serde_json::to_string(&event.kind).unwrap_or_default();
        info!(
            target: "audit",
            job_id = %event.job_id,
            identity = %event.identity,
            at = %event.at.to_rfc3339(),
            event = event.kind.name(),
            %detail,
            "job lifecycle"
        );
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, job_id: JobId) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}
