// src/cleanup.rs

//! Hand-off of finished jobs' files to an external sweeper.
//!
//! The scheduler enqueues one [`CleanupEntry`] per terminal job. It never
//! deletes anything on a timer itself; a periodic sweep calls
//! [`CleanupQueue::take_due`] and then [`purge`] on what it gets back.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::Result;
use crate::types::{JobId, JobStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct CleanupEntry {
    pub job_id: JobId,
    pub status: JobStatus,
    /// Produced output, for succeeded jobs.
    pub artifact_path: Option<PathBuf>,
    /// Per-job working directory; contains the artifact.
    pub workdir: PathBuf,
    /// Earliest instant the files may be removed.
    pub delete_after: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct CleanupQueue {
    entries: Mutex<Vec<CleanupEntry>>,
}

impl CleanupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, entry: CleanupEntry) {
        debug!(
            job_id = %entry.job_id,
            delete_after = %entry.delete_after.to_rfc3339(),
            "cleanup scheduled"
        );
        self.entries.lock().push(entry);
    }

    /// Everything queued, due or not.
    pub fn pending(&self) -> Vec<CleanupEntry> {
        self.entries.lock().clone()
    }

    /// Remove and return the entries whose retention ended at or before `now`.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<CleanupEntry> {
        let mut entries = self.entries.lock();
        let (due, keep): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|e| e.delete_after <= now);
        *entries = keep;
        due
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Delete the entry's working directory. Missing directories are fine.
pub async fn purge(entry: &CleanupEntry) -> Result<()> {
    match tokio::fs::remove_dir_all(&entry.workdir).await {
        Ok(()) => {
            info!(job_id = %entry.job_id, workdir = ?entry.workdir, "job files removed");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::Error::from(e)
            .context(format!("removing {:?}", entry.workdir))
            .into()),
    }
}
