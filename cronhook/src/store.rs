//! The durable job store boundary.
//!
//! Implementations provide CRUD over job definitions plus the two queries the
//! trigger loop needs: due selection and next-fire-time updates. All
//! operations are atomic at single-job granularity; cross-job consistency is
//! not required because `next_fire_at` has a single writer (the trigger
//! loop).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::job::{Job, JobId, JobStatus};

pub mod memory;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job `{0}` already exists")]
    Duplicate(JobId),
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("error encoding or decoding stored data")]
    EncodeDecode(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same operation can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts a new job. Fails with [`StoreError::Duplicate`] when the id is
    /// already present, leaving the existing job unmodified.
    async fn create(&self, job: Job) -> Result<(), StoreError>;

    async fn get(&self, id: &JobId) -> Result<Job, StoreError>;

    /// Removes the job definition. Run history is not touched.
    async fn delete(&self, id: &JobId) -> Result<(), StoreError>;

    /// All jobs with status [`JobStatus::Scheduled`] whose `next_fire_at` is
    /// at or before `now`, ordered by due time.
    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    async fn update_next_fire_time(&self, id: &JobId, at: DateTime<Utc>)
        -> Result<(), StoreError>;

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError>;
}
