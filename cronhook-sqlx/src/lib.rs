//! SQLite-backed implementations of the cronhook store traits.
//!
//! [`SqliteStore`] implements both [`cronhook::store::JobStore`] and
//! [`cronhook::ledger::RunLedger`] over a single [`SqlitePool`], giving the
//! scheduler a durable home for job definitions and run history. Call
//! [`SqliteStore::migrate`] once at startup to create the schema.

use cronhook::store::StoreError;
use sqlx::SqlitePool;

mod store;
mod types;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS cronhook_jobs (
        id TEXT PRIMARY KEY,
        cron TEXT NOT NULL,
        method TEXT NOT NULL,
        url TEXT NOT NULL,
        headers TEXT,
        body TEXT,
        status TEXT NOT NULL,
        next_fire_at TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS cronhook_jobs_due_idx
        ON cronhook_jobs (status, next_fire_at)",
    "CREATE TABLE IF NOT EXISTS cronhook_runs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id TEXT NOT NULL,
        url TEXT NOT NULL,
        cron TEXT NOT NULL,
        method TEXT NOT NULL,
        status_code INTEGER,
        ok INTEGER NOT NULL,
        response_text TEXT,
        elapsed_ms REAL NOT NULL,
        error TEXT,
        run_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS cronhook_runs_job_idx
        ON cronhook_runs (job_id, run_at DESC)",
];

/// A [`SqlitePool`]-backed job store and run ledger.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the job and run tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

impl From<SqlitePool> for SqliteStore {
    fn from(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) fn map_err(error: sqlx::Error) -> StoreError {
    StoreError::Unavailable(error.to_string())
}
