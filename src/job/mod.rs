// src/job/mod.rs

//! Job records and the guarded transitions between their statuses.
//!
//! The scheduler is the only writer of a [`JobRecord`]; every mutation goes
//! through one of the transition methods, which refuse anything the state
//! machine does not allow.

pub mod record;

pub use record::{JobRecord, TerminalOutcome};
