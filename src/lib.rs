// src/lib.rs

//! Download job orchestration for Steam Workshop content.
//!
//! Accepts download requests, enforces per-identity concurrency, rate and
//! quota limits, supervises one external download tool process per job,
//! streams live progress to observers and reclaims everything when a job
//! ends.
//!
//! Typical wiring:
//!
//! ```no_run
//! use std::sync::Arc;
//! use workshop_jobs::{IdentityId, JobScheduler, config};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cfg = config::load_and_validate(config::default_config_path())?;
//! workshop_jobs::logging::init_logging(cfg.logging.level)?;
//!
//! let scheduler = JobScheduler::builder(cfg.engine_config()?)
//!     .limits(Arc::new(cfg.limits_provider()))
//!     .build();
//!
//! let job_id = scheduler.submit(IdentityId::new("api-key-1"), "2503622437").await?;
//! let mut progress = scheduler.subscribe_progress(job_id).await?;
//! while let Some(event) = progress.next().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod admission;
pub mod audit;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod hub;
pub mod job;
pub mod limits;
pub mod logging;
pub mod progress;
pub mod store;
pub mod types;

pub use engine::JobScheduler;
pub use errors::{CancelOutcome, JobsError, Result, SubmitError};
pub use hub::{JobEvent, JobFinished, Subscription};
pub use job::JobRecord;
pub use types::{DenialReason, IdentityId, JobId, JobStatus, Limits};
