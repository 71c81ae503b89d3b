//! Client-facing orchestration over the store and the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Tz;
use serde::Deserialize;
use thiserror::Error;

use crate::cron::CronExpression;
use crate::job::{HttpAction, HttpMethod, Job, JobId, JobStatus};
use crate::ledger::{RunLedger, RunPage};
use crate::store::{JobStore, StoreError};

/// Upper bound on caller-assigned job ids.
pub const MAX_ID_LENGTH: usize = 200;

/// Upper bound on a single run-history page.
pub const MAX_RUNS_LIMIT: u64 = 200;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("job `{0}` already exists")]
    Duplicate(JobId),
    #[error("job `{0}` not found")]
    NotFound(JobId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Duplicate(id) => Self::Duplicate(id),
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

/// A client request to register a job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub id: String,
    pub cron: String,
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
}

/// Validates client requests and keeps the store and the live schedule
/// consistent.
///
/// The service never mutates `next_fire_at` of an existing scheduled job;
/// that field is owned by the trigger loop. The exceptions are creation and
/// resume, both of which compute a fresh fire time from the current instant.
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn RunLedger>,
    timezone: Tz,
}

impl JobService {
    pub fn new(store: Arc<dyn JobStore>, ledger: Arc<dyn RunLedger>, timezone: Tz) -> Self {
        Self {
            store,
            ledger,
            timezone,
        }
    }

    /// Validates `spec` and persists it with an initial fire time computed
    /// from now. A duplicate id surfaces as a conflict, never an overwrite.
    pub async fn create_job(&self, spec: JobSpec) -> Result<Job, ServiceError> {
        if spec.id.is_empty() || spec.id.len() > MAX_ID_LENGTH {
            return Err(ServiceError::Validation(format!(
                "job id must be 1-{MAX_ID_LENGTH} characters"
            )));
        }
        let method = match &spec.method {
            Some(raw) => raw
                .parse::<HttpMethod>()
                .map_err(ServiceError::Validation)?,
            None => HttpMethod::Get,
        };
        let url = reqwest::Url::parse(&spec.url)
            .map_err(|err| ServiceError::Validation(format!("invalid url: {err}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ServiceError::Validation(
                "url scheme must be http or https".to_owned(),
            ));
        }
        let cron = CronExpression::parse(&spec.cron, self.timezone)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;

        let now = Utc::now();
        let next_fire_at = cron.next_after(now).ok_or_else(|| {
            ServiceError::Validation("cron expression has no future fire time".to_owned())
        })?;

        let job = Job {
            id: spec.id.into(),
            cron: spec.cron,
            action: HttpAction {
                method,
                url: spec.url,
                headers: spec.headers,
                body: spec.body,
            },
            status: JobStatus::Scheduled,
            next_fire_at,
            created_at: now,
        };
        self.store.create(job.clone()).await?;
        tracing::info!(job_id = %job.id, cron = %job.cron, next_fire_at = %job.next_fire_at, "job created");
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job, ServiceError> {
        Ok(self.store.get(id).await?)
    }

    /// Removes the job. An in-flight firing is left to complete; its ledger
    /// entry persists, and nothing further is scheduled because the
    /// definition is gone.
    pub async fn delete_job(&self, id: &JobId) -> Result<(), ServiceError> {
        self.store.delete(id).await?;
        tracing::info!(job_id = %id, "job deleted");
        Ok(())
    }

    pub async fn pause_job(&self, id: &JobId) -> Result<(), ServiceError> {
        self.store.set_status(id, JobStatus::Paused).await?;
        tracing::info!(job_id = %id, "job paused");
        Ok(())
    }

    /// Re-enables a paused job. The fire time is recomputed from now so the
    /// paused interval is not treated as missed firings.
    pub async fn resume_job(&self, id: &JobId) -> Result<(), ServiceError> {
        let job = self.store.get(id).await?;
        let cron = CronExpression::parse(&job.cron, self.timezone)
            .map_err(|err| ServiceError::Validation(err.to_string()))?;
        let next_fire_at = cron.next_after(Utc::now()).ok_or_else(|| {
            ServiceError::Validation("cron expression has no future fire time".to_owned())
        })?;
        self.store.update_next_fire_time(id, next_fire_at).await?;
        self.store.set_status(id, JobStatus::Scheduled).await?;
        tracing::info!(job_id = %id, next_fire_at = %next_fire_at, "job resumed");
        Ok(())
    }

    /// Pages through a job's run history, newest first.
    ///
    /// History survives deletion of the job definition, so no existence check
    /// is made here.
    pub async fn runs(
        &self,
        id: &JobId,
        limit: u64,
        offset: u64,
    ) -> Result<RunPage, ServiceError> {
        if limit > MAX_RUNS_LIMIT {
            return Err(ServiceError::Validation(format!(
                "limit must be at most {MAX_RUNS_LIMIT}"
            )));
        }
        Ok(self.ledger.query(id, limit, offset).await?)
    }
}
