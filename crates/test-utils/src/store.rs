#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use workshop_jobs::errors::{JobsError, Result};
use workshop_jobs::job::JobRecord;
use workshop_jobs::store::{BoxFuture, InMemoryJobStore, JobStore};
use workshop_jobs::types::{JobId, JobStatus};

/// In-memory store whose `n`-th save (counting from 1) fails. Every other
/// call goes through.
#[derive(Debug)]
pub struct FailingStore {
    inner: InMemoryJobStore,
    fail_on: usize,
    saves: AtomicUsize,
}

impl FailingStore {
    pub fn failing_save(n: usize) -> Self {
        Self {
            inner: InMemoryJobStore::new(),
            fail_on: n,
            saves: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryJobStore {
        &self.inner
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl JobStore for FailingStore {
    fn save(&self, record: JobRecord) -> BoxFuture<'_, Result<()>> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Box::pin(async {
                Err(JobsError::Other(anyhow::anyhow!("database unavailable")))
            });
        }
        self.inner.save(record)
    }

    fn load(&self, job_id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>>> {
        self.inner.load(job_id)
    }

    fn list_by_status(&self, status: JobStatus) -> BoxFuture<'_, Result<Vec<JobRecord>>> {
        self.inner.list_by_status(status)
    }
}
