use std::collections::HashMap;

use chrono::{DateTime, Utc};
use cronhook::job::{HttpAction, HttpMethod, Job, JobStatus};
use cronhook::ledger::RunRecord;
use cronhook::store::StoreError;
use sqlx::prelude::FromRow;

#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub id: String,
    pub cron: String,
    pub method: String,
    pub url: String,
    pub headers: Option<String>,
    pub body: Option<String>,
    pub status: String,
    pub next_fire_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let headers = row
            .headers
            .as_deref()
            .map(serde_json::from_str::<HashMap<String, String>>)
            .transpose()?;
        Ok(Self {
            id: row.id.into(),
            cron: row.cron,
            action: HttpAction {
                method: row.method.parse::<HttpMethod>().map_err(corrupt)?,
                url: row.url,
                headers,
                body: row.body,
            },
            status: row.status.parse::<JobStatus>().map_err(corrupt)?,
            next_fire_at: row.next_fire_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct RunRow {
    pub job_id: String,
    pub url: String,
    pub cron: String,
    pub method: String,
    pub status_code: Option<i64>,
    pub ok: bool,
    pub response_text: Option<String>,
    pub elapsed_ms: f64,
    pub error: Option<String>,
    pub run_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for RunRecord {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        let status_code = row
            .status_code
            .map(u16::try_from)
            .transpose()
            .map_err(|err| corrupt(err.to_string()))?;
        Ok(Self {
            job_id: row.job_id.into(),
            url: row.url,
            cron: row.cron,
            method: row.method.parse::<HttpMethod>().map_err(corrupt)?,
            status_code,
            ok: row.ok,
            response_text: row.response_text,
            elapsed_ms: row.elapsed_ms,
            error: row.error,
            run_at: row.run_at,
        })
    }
}

fn corrupt(detail: String) -> StoreError {
    StoreError::Unavailable(format!("corrupt row: {detail}"))
}
