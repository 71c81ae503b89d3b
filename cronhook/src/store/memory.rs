//! Provides in memory implementations of [`JobStore`] and [`RunLedger`].
//!
//! These are provided as correct (but not optimized) implementations
//! primarily for use in testing circumstances.
//!
//! **They are not designed for use in a production system**: nothing
//! survives a restart.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::job::{Job, JobId, JobStatus};
use crate::ledger::{RunLedger, RunPage, RunRecord};
use crate::store::{JobStore, StoreError};

/// An in memory implementation of [`JobStore`] and [`RunLedger`].
#[derive(Clone, Default)]
pub struct InMemoryStore {
    jobs: Arc<RwLock<HashMap<JobId, Job>>>,
    runs: Arc<RwLock<Vec<RunRecord>>>,
}

impl InMemoryStore {
    /// Creates a new empty instance of [`InMemoryStore`].
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("store lock poisoned".to_owned())
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        self.jobs
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        self.jobs
            .write()
            .map_err(|_| poisoned())?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut due: Vec<Job> = self
            .jobs
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|job| job.status == JobStatus::Scheduled && job.next_fire_at <= now)
            .cloned()
            .collect();
        due.sort_by_key(|job| job.next_fire_at);
        Ok(due)
    }

    async fn update_next_fire_time(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(id) {
            None => Err(StoreError::NotFound(id.clone())),
            Some(job) => {
                job.next_fire_at = at;
                Ok(())
            }
        }
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| poisoned())?;
        match jobs.get_mut(id) {
            None => Err(StoreError::NotFound(id.clone())),
            Some(job) => {
                job.status = status;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl RunLedger for InMemoryStore {
    async fn append(&self, record: RunRecord) -> Result<(), StoreError> {
        self.runs.write().map_err(|_| poisoned())?.push(record);
        Ok(())
    }

    async fn query(&self, job_id: &JobId, limit: u64, offset: u64) -> Result<RunPage, StoreError> {
        let runs = self.runs.read().map_err(|_| poisoned())?;
        let matching: Vec<&RunRecord> = runs.iter().filter(|run| &run.job_id == job_id).collect();
        let total = matching.len() as u64;
        // Appended in firing order, so newest-first is reverse insertion
        // order, which also keeps pagination stable across pages.
        let items = matching
            .into_iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(RunPage { total, items })
    }
}
