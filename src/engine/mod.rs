// src/engine/mod.rs

//! Job orchestration engine.
//!
//! This module ties together:
//! - admission (may this identity start another job now?)
//! - the process runner and progress parser for each admitted job
//! - the broadcast hub that fans progress out to observers
//! - persistence, audit and cleanup hand-off on terminal transitions
//!
//! [`JobScheduler`] is the public handle. Every running job gets its own
//! driver task, which is the single writer of that job's
//! record. The job slot holds the state the handle and the driver share.

pub(crate) mod driver;
pub mod scheduler;
pub(crate) mod slot;

pub use scheduler::{JobScheduler, SchedulerBuilder};
