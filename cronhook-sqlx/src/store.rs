use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cronhook::job::{Job, JobId, JobStatus};
use cronhook::ledger::{RunLedger, RunPage, RunRecord};
use cronhook::store::{JobStore, StoreError};
use sqlx::sqlite::SqliteQueryResult;
use tracing::instrument;

use crate::types::{JobRow, RunRow};
use crate::{map_err, SqliteStore};

const JOB_COLUMNS: &str =
    "id, cron, method, url, headers, body, status, next_fire_at, created_at";
const RUN_COLUMNS: &str =
    "job_id, url, cron, method, status_code, ok, response_text, elapsed_ms, error, run_at";

impl SqliteStore {
    fn handle_update(
        result: sqlx::Result<SqliteQueryResult>,
        id: &JobId,
    ) -> Result<(), StoreError> {
        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound(id.clone())),
            Ok(_) => Ok(()),
            Err(error) => Err(map_err(error)),
        }
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn create(&self, job: Job) -> Result<(), StoreError> {
        let headers = job
            .action
            .headers
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result = sqlx::query(
            "INSERT INTO cronhook_jobs (id, cron, method, url, headers, body, status, next_fire_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.as_str())
        .bind(&job.cron)
        .bind(job.action.method.as_str())
        .bind(&job.action.url)
        .bind(headers)
        .bind(&job.action.body)
        .bind(job.status.as_str())
        .bind(job.next_fire_at)
        .bind(job.created_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db))
                if db.kind() == sqlx::error::ErrorKind::UniqueViolation =>
            {
                Err(StoreError::Duplicate(job.id))
            }
            Err(error) => Err(map_err(error)),
        }
    }

    async fn get(&self, id: &JobId) -> Result<Job, StoreError> {
        sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM cronhook_jobs WHERE id = ?"
        ))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_err)?
        .ok_or_else(|| StoreError::NotFound(id.clone()))?
        .try_into()
    }

    async fn delete(&self, id: &JobId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM cronhook_jobs WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await;
        Self::handle_update(result, id)
    }

    async fn list_due(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {JOB_COLUMNS} FROM cronhook_jobs
             WHERE status = ? AND next_fire_at <= ?
             ORDER BY next_fire_at"
        ))
        .bind(JobStatus::Scheduled.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn update_next_fire_time(
        &self,
        id: &JobId,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE cronhook_jobs SET next_fire_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.as_str())
            .execute(&self.pool)
            .await;
        Self::handle_update(result, id)
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE cronhook_jobs SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id.as_str())
            .execute(&self.pool)
            .await;
        Self::handle_update(result, id)
    }
}

#[async_trait]
impl RunLedger for SqliteStore {
    async fn append(&self, record: RunRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cronhook_runs (job_id, url, cron, method, status_code, ok, response_text, elapsed_ms, error, run_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.job_id.as_str())
        .bind(&record.url)
        .bind(&record.cron)
        .bind(record.method.as_str())
        .bind(record.status_code.map(i64::from))
        .bind(record.ok)
        .bind(&record.response_text)
        .bind(record.elapsed_ms)
        .bind(&record.error)
        .bind(record.run_at)
        .execute(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(())
    }

    async fn query(&self, job_id: &JobId, limit: u64, offset: u64) -> Result<RunPage, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cronhook_runs WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_err)?;

        // The id tiebreak keeps pages stable when several records share a
        // run_at.
        let items = sqlx::query_as::<_, RunRow>(&format!(
            "SELECT {RUN_COLUMNS} FROM cronhook_runs
             WHERE job_id = ?
             ORDER BY run_at DESC, id DESC
             LIMIT ? OFFSET ?"
        ))
        .bind(job_id.as_str())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(map_err)?
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<Vec<_>, _>>()?;

        Ok(RunPage {
            total: total as u64,
            items,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{TimeDelta, TimeZone};
    use cronhook::job::{HttpAction, HttpMethod};
    use sqlx::sqlite::SqlitePoolOptions;
    use std::collections::HashMap;

    async fn test_store() -> SqliteStore {
        // A single connection keeps every query on the same in-memory
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn instant(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, second).unwrap()
    }

    fn job(id: &str, next_fire_at: DateTime<Utc>) -> Job {
        let mut headers = HashMap::new();
        headers.insert("x-token".to_owned(), "secret".to_owned());
        Job {
            id: id.into(),
            cron: "*/5 * * * *".to_owned(),
            action: HttpAction {
                method: HttpMethod::Post,
                url: format!("http://example.com/{id}"),
                headers: Some(headers),
                body: Some("payload".to_owned()),
            },
            status: JobStatus::Scheduled,
            next_fire_at,
            created_at: instant(0),
        }
    }

    fn record(job_id: &str, run_at: DateTime<Utc>) -> RunRecord {
        RunRecord {
            job_id: job_id.into(),
            url: format!("http://example.com/{job_id}"),
            cron: "*/5 * * * *".to_owned(),
            method: HttpMethod::Get,
            status_code: Some(200),
            ok: true,
            response_text: Some("pong".to_owned()),
            elapsed_ms: 12.5,
            error: None,
            run_at,
        }
    }

    #[tokio::test]
    async fn job_round_trips_through_the_store() {
        let store = test_store().await;
        let job = job("ping", instant(30));
        store.create(job.clone()).await.unwrap();

        let loaded = store.get(&"ping".into()).await.unwrap();
        assert_eq!(loaded, job);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts_and_keeps_original() {
        let store = test_store().await;
        let original = job("ping", instant(30));
        store.create(original.clone()).await.unwrap();

        let mut replacement = job("ping", instant(45));
        replacement.cron = "0 0 * * *".to_owned();
        assert_matches!(
            store.create(replacement).await,
            Err(StoreError::Duplicate(_))
        );
        assert_eq!(store.get(&"ping".into()).await.unwrap(), original);
    }

    #[tokio::test]
    async fn delete_and_missing_lookups_are_not_found() {
        let store = test_store().await;
        store.create(job("ping", instant(30))).await.unwrap();

        store.delete(&"ping".into()).await.unwrap();
        assert_matches!(
            store.get(&"ping".into()).await,
            Err(StoreError::NotFound(_))
        );
        assert_matches!(
            store.delete(&"ping".into()).await,
            Err(StoreError::NotFound(_))
        );
        assert_matches!(
            store
                .update_next_fire_time(&"ping".into(), instant(30))
                .await,
            Err(StoreError::NotFound(_))
        );
        assert_matches!(
            store.set_status(&"ping".into(), JobStatus::Paused).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn list_due_selects_scheduled_jobs_at_or_before_now() {
        let store = test_store().await;
        let now = instant(30);
        store.create(job("due", now - TimeDelta::seconds(5))).await.unwrap();
        store.create(job("exactly-due", now)).await.unwrap();
        store.create(job("future", now + TimeDelta::seconds(5))).await.unwrap();
        let mut paused = job("paused", now - TimeDelta::seconds(5));
        paused.status = JobStatus::Paused;
        store.create(paused).await.unwrap();

        let due = store.list_due(now).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|job| job.id.as_str()).collect();
        assert_eq!(ids, vec!["due", "exactly-due"]);
    }

    #[tokio::test]
    async fn update_next_fire_time_persists() {
        let store = test_store().await;
        let now = instant(30);
        store.create(job("ping", now)).await.unwrap();

        let next = now + TimeDelta::minutes(5);
        store
            .update_next_fire_time(&"ping".into(), next)
            .await
            .unwrap();
        assert_eq!(store.get(&"ping".into()).await.unwrap().next_fire_at, next);
        assert!(store.list_due(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pause_filters_job_out_of_due_selection() {
        let store = test_store().await;
        let now = instant(30);
        store.create(job("ping", now)).await.unwrap();

        store
            .set_status(&"ping".into(), JobStatus::Paused)
            .await
            .unwrap();
        assert!(store.list_due(now).await.unwrap().is_empty());

        store
            .set_status(&"ping".into(), JobStatus::Scheduled)
            .await
            .unwrap();
        assert_eq!(store.list_due(now).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_records_round_trip_including_failures() {
        let store = test_store().await;
        let failure = RunRecord {
            status_code: None,
            ok: false,
            response_text: None,
            elapsed_ms: 1000.5,
            error: Some("connection refused".to_owned()),
            ..record("ping", instant(10))
        };
        store.append(failure.clone()).await.unwrap();

        let page = store.query(&"ping".into(), 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0], failure);
    }

    #[tokio::test]
    async fn query_pages_newest_first() {
        let store = test_store().await;
        for second in 0..5 {
            store.append(record("ping", instant(second))).await.unwrap();
        }
        store.append(record("other", instant(0))).await.unwrap();

        let page = store.query(&"ping".into(), 2, 1).await.unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].run_at, instant(3));
        assert_eq!(page.items[1].run_at, instant(2));

        for (limit, offset, expected) in [(0, 0, 0), (3, 3, 2), (3, 5, 0), (10, 0, 5)] {
            let page = store.query(&"ping".into(), limit, offset).await.unwrap();
            assert_eq!(page.total, 5);
            assert_eq!(page.items.len(), expected, "limit={limit} offset={offset}");
        }
    }
}
