// src/admission/mod.rs

//! Per-identity admission control.
//!
//! Four limits are enforced, checked in this order:
//! - `max_concurrent`: tickets currently held
//! - `rate_per_minute`: acquisitions in the trailing 60 seconds
//! - `quota_daily`: acquisitions since the last UTC midnight
//! - `quota_monthly`: acquisitions since the first UTC instant of the month
//!
//! Quota counters only ever go up within their period; releasing a ticket
//! frees the concurrency slot and nothing else.

pub mod controller;
mod window;

pub use controller::{AdmissionController, Ticket, Usage};
