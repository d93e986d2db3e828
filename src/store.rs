// src/store.rs

//! Job record persistence.
//!
//! The scheduler talks to a [`JobStore`] rather than a concrete database so
//! the web layer can plug in its ORM, and tests can use
//! [`InMemoryJobStore`]. [`JsonDirJobStore`] is a small file-backed
//! implementation for single-node deployments.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use anyhow::Context;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::job::JobRecord;
use crate::types::{JobId, JobStatus};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait JobStore: Send + Sync + Debug {
    /// Insert or replace the record with the same id.
    fn save(&self, record: JobRecord) -> BoxFuture<'_, Result<()>>;

    fn load(&self, job_id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>>>;

    /// Records with `status`, oldest first.
    fn list_by_status(&self, status: JobStatus) -> BoxFuture<'_, Result<Vec<JobRecord>>>;
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    records: RwLock<HashMap<JobId, JobRecord>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl JobStore for InMemoryJobStore {
    fn save(&self, record: JobRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.records.write().insert(record.id(), record);
            Ok(())
        })
    }

    fn load(&self, job_id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>>> {
        Box::pin(async move { Ok(self.records.read().get(&job_id).cloned()) })
    }

    fn list_by_status(&self, status: JobStatus) -> BoxFuture<'_, Result<Vec<JobRecord>>> {
        Box::pin(async move {
            let mut out: Vec<JobRecord> = self
                .records
                .read()
                .values()
                .filter(|r| r.status() == status)
                .cloned()
                .collect();
            out.sort_by_key(|r| r.created_at());
            Ok(out)
        })
    }
}

/// One pretty-printed JSON file per job under a directory.
///
/// Writes go to a temporary file that is then renamed over the old one, so a
/// crash never leaves a half-written record behind.
#[derive(Debug, Clone)]
pub struct JsonDirJobStore {
    dir: PathBuf,
}

impl JsonDirJobStore {
    /// Use `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating job store dir {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, job_id: JobId) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }
}

impl JobStore for JsonDirJobStore {
    fn save(&self, record: JobRecord) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let path = self.path_for(record.id());
            let tmp = path.with_extension("json.tmp");
            let bytes = serde_json::to_vec_pretty(&record)?;
            tokio::fs::write(&tmp, bytes)
                .await
                .with_context(|| format!("writing {:?}", tmp))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .with_context(|| format!("renaming {:?} to {:?}", tmp, path))?;
            debug!(job_id = %record.id(), status = %record.status(), "job record saved");
            Ok(())
        })
    }

    fn load(&self, job_id: JobId) -> BoxFuture<'_, Result<Option<JobRecord>>> {
        Box::pin(async move {
            let path = self.path_for(job_id);
            match tokio::fs::read(&path).await {
                Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_by_status(&self, status: JobStatus) -> BoxFuture<'_, Result<Vec<JobRecord>>> {
        Box::pin(async move {
            let mut out = Vec::new();
            let mut entries = tokio::fs::read_dir(&self.dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = tokio::fs::read(&path).await?;
                match serde_json::from_slice::<JobRecord>(&bytes) {
                    Ok(record) if record.status() == status => out.push(record),
                    Ok(_) => {}
                    Err(e) => warn!(path = ?path, error = %e, "skipping unreadable job record"),
                }
            }
            out.sort_by_key(|r| r.created_at());
            Ok(out)
        })
    }
}
