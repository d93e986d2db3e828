// src/progress/mod.rs

//! Progress extraction from download tool output.
//!
//! - [`patterns`] holds the versioned regex table for the tool's format.
//! - [`parser`] applies it line by line, keeping output monotonic.
//!
//! [`ProgressEvent`] is what the scheduler stamps onto parsed updates before
//! fanning them out.

pub mod parser;
pub mod patterns;

use serde::Serialize;

use crate::types::JobId;

pub use parser::{ParsedLine, ProgressParser, ProgressUpdate};
pub use patterns::{CURRENT_PATTERN_VERSION, PatternTable, Phase};

/// One progress notification for a job. `seq` increases by one per event
/// within a job, starting at 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub seq: u64,
    pub phase: Phase,
    pub progress: f64,
    pub message: Option<String>,
}
