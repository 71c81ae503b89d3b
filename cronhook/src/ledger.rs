//! The append-only run-history ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{HttpMethod, JobId};
use crate::store::StoreError;

/// One execution attempt of a job's action.
///
/// The action fields are denormalized at fire time: the job definition may
/// later change or be deleted, but its history must remain self-describing.
/// Records are never mutated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub job_id: JobId,
    pub url: String,
    pub cron: String,
    pub method: HttpMethod,
    pub status_code: Option<u16>,
    pub ok: bool,
    pub response_text: Option<String>,
    pub elapsed_ms: f64,
    pub error: Option<String>,
    /// The instant the firing actually happened, not the due instant.
    pub run_at: DateTime<Utc>,
}

/// One page of run history, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct RunPage {
    pub total: u64,
    pub items: Vec<RunRecord>,
}

#[async_trait]
pub trait RunLedger: Send + Sync {
    /// Appends a record. Callers on the scheduling path treat a failure as
    /// log-and-continue: losing a history entry must never block scheduling.
    async fn append(&self, record: RunRecord) -> Result<(), StoreError>;

    /// Pages through a job's history newest-first. `limit = 0` is legal and
    /// returns an empty page with the correct total.
    async fn query(&self, job_id: &JobId, limit: u64, offset: u64) -> Result<RunPage, StoreError>;
}
