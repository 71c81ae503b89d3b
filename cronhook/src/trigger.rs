//! The trigger loop: scans for due jobs on a fixed interval and fires them.
//!
//! One loop instance runs per process. Scheduling state lives entirely in the
//! [`JobStore`], so the loop is restartable with no data loss; it holds only
//! a claim set of jobs currently firing, which guarantees consecutive firings
//! of one job are never concurrent.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backoff::{BackoffStrategy, Exponential, Jitter, Strategy};
use crate::cron::CronExpression;
use crate::executor::ActionExecutor;
use crate::job::{Job, JobId, JobStatus};
use crate::ledger::RunLedger;
use crate::store::{JobStore, StoreError};
use crate::CronhookError;

/// Transient store failures are retried this many times within a tick before
/// the loop gives up and leaves the job due for the next cycle.
const MAX_STORE_ATTEMPTS: u16 = 3;

const STORE_RETRY: BackoffStrategy<Exponential> =
    BackoffStrategy::exponential(TimeDelta::milliseconds(50))
        .with_max(TimeDelta::milliseconds(500))
        .with_jitter(Jitter::Relative(0.1));

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// How often the loop scans the store for due jobs.
    pub tick_interval: Duration,
    /// Size of the worker pool bounding concurrent outbound calls.
    pub max_concurrency: usize,
    /// Timezone cron expressions are evaluated in.
    pub timezone: Tz,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrency: 16,
            timezone: Tz::UTC,
        }
    }
}

/// Handle to a spawned [`TriggerLoop`].
#[derive(Debug)]
pub struct TriggerHandle {
    sender: mpsc::UnboundedSender<Message>,
    handle: Option<JoinHandle<()>>,
}

enum Message {
    Terminate,
}

impl TriggerHandle {
    /// Stops the loop and waits for in-flight firings to complete.
    pub async fn graceful_shutdown(mut self) -> Result<(), CronhookError> {
        self.sender
            .send(Message::Terminate)
            .map_err(|_| CronhookError::GracefulShutdownFailed)?;
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|_| CronhookError::GracefulShutdownFailed)?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TriggerLoop {
    store: Arc<dyn JobStore>,
    ledger: Arc<dyn RunLedger>,
    executor: Arc<dyn ActionExecutor>,
    config: TriggerConfig,
    workers: Arc<Semaphore>,
    in_flight: Arc<Mutex<HashSet<JobId>>>,
}

impl TriggerLoop {
    pub fn new(
        store: Arc<dyn JobStore>,
        ledger: Arc<dyn RunLedger>,
        executor: Arc<dyn ActionExecutor>,
        config: TriggerConfig,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            store,
            ledger,
            executor,
            config,
            workers,
            in_flight: Default::default(),
        }
    }

    /// Spawns the loop onto the runtime and returns its shutdown handle.
    pub fn spawn(self) -> TriggerHandle {
        let (sender, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => self.tick(Utc::now()).await,
                    _ = rx.recv() => break,
                }
            }
            // Drain the worker pool so in-flight firings finish and their
            // ledger entries persist before shutdown completes.
            let _ = self
                .workers
                .acquire_many(self.config.max_concurrency as u32)
                .await;
            tracing::debug!("shutting down trigger loop");
        });

        TriggerHandle {
            sender,
            handle: Some(handle),
        }
    }

    /// One scan: select due jobs and dispatch each to a pool worker.
    ///
    /// A job overdue by more than one tick (the process was down, or a
    /// previous tick was slow) fires exactly once and reschedules from the
    /// firing instant; missed occurrences are never backfilled.
    pub(crate) async fn tick(&self, now: DateTime<Utc>) {
        let due = match with_store_retry("list_due", || self.store.list_due(now)).await {
            Ok(due) => due,
            Err(err) => {
                tracing::error!(?err, "failed to list due jobs, retrying next tick");
                return;
            }
        };

        for job in due {
            if !self.claim(&job.id) {
                // Still firing from an earlier tick.
                continue;
            }
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                self.release(&job.id);
                tracing::debug!("worker pool saturated, deferring remaining due jobs");
                break;
            };
            let runner = self.clone();
            tokio::spawn(async move {
                runner.fire(job).await;
                drop(permit);
            });
        }
    }

    async fn fire(&self, job: Job) {
        let fired_at = Utc::now();
        tracing::debug!(job_id = %job.id, url = %job.action.url, "firing job");

        let outcome = self.executor.execute(&job.action).await;
        if !outcome.ok {
            tracing::warn!(
                job_id = %job.id,
                status = ?outcome.status_code,
                error = ?outcome.error,
                "job firing failed",
            );
        }

        let record = outcome.into_record(&job, fired_at);
        let _ = self.ledger.append(record).await.inspect_err(|err| {
            tracing::warn!(?err, job_id = %job.id, "failed to append run record, continuing");
        });

        self.reschedule(&job, fired_at).await;
        self.release(&job.id);
    }

    async fn reschedule(&self, job: &Job, fired_at: DateTime<Utc>) {
        let next = match CronExpression::parse(&job.cron, self.config.timezone) {
            Ok(cron) => cron.next_after(fired_at),
            Err(err) => {
                tracing::error!(?err, job_id = %job.id, "stored cron expression no longer parses");
                None
            }
        };

        let Some(next) = next else {
            // Without a future fire time the job would be re-selected every
            // tick; park it instead.
            tracing::error!(job_id = %job.id, "no future fire time, pausing job");
            let _ = with_store_retry("set_status", || {
                self.store.set_status(&job.id, JobStatus::Paused)
            })
            .await;
            return;
        };

        match with_store_retry("update_next_fire_time", || {
            self.store.update_next_fire_time(&job.id, next)
        })
        .await
        {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                tracing::debug!(job_id = %job.id, "job deleted during firing");
            }
            Err(err) => {
                // The job stays due and will be re-attempted next tick:
                // at-least-once, never lost.
                tracing::error!(?err, job_id = %job.id, "failed to persist next fire time");
            }
        }
    }

    fn claim(&self, id: &JobId) -> bool {
        match self.in_flight.lock() {
            Ok(mut in_flight) => in_flight.insert(id.clone()),
            Err(_) => false,
        }
    }

    fn release(&self, id: &JobId) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.remove(id);
        }
    }
}

async fn with_store_retry<T, F, Fut>(operation: &'static str, mut run: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 1;
    loop {
        match run().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_STORE_ATTEMPTS => {
                let delay = STORE_RETRY.backoff(attempt);
                tracing::warn!(?err, attempt, "store {operation} failed, retrying in {delay}");
                tokio::time::sleep(delay.to_std().unwrap_or_default()).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::RunOutcome;
    use crate::job::{HttpAction, HttpMethod};
    use crate::store::memory::InMemoryStore;
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    #[derive(Clone)]
    struct RecordingExecutor {
        calls: Arc<Mutex<Vec<HttpAction>>>,
        delay: Duration,
        succeed: bool,
    }

    impl RecordingExecutor {
        fn new() -> Self {
            Self {
                calls: Default::default(),
                delay: Duration::ZERO,
                succeed: true,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        fn failing(mut self) -> Self {
            self.succeed = false;
            self
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, action: &HttpAction) -> RunOutcome {
            self.calls.lock().unwrap().push(action.clone());
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.succeed {
                RunOutcome {
                    status_code: Some(200),
                    ok: true,
                    response_text: Some("ok".to_owned()),
                    elapsed_ms: 1.0,
                    error: None,
                }
            } else {
                RunOutcome {
                    status_code: None,
                    ok: false,
                    response_text: None,
                    elapsed_ms: 1.0,
                    error: Some("connection refused".to_owned()),
                }
            }
        }
    }

    fn job(id: &str, cron: &str, next_fire_at: DateTime<Utc>) -> Job {
        Job {
            id: id.into(),
            cron: cron.to_owned(),
            action: HttpAction {
                method: HttpMethod::Get,
                url: format!("http://example.com/{id}"),
                headers: None,
                body: None,
            },
            status: JobStatus::Scheduled,
            next_fire_at,
            created_at: Utc::now(),
        }
    }

    fn trigger(store: &InMemoryStore, executor: &RecordingExecutor, max: usize) -> TriggerLoop {
        TriggerLoop::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(executor.clone()),
            TriggerConfig {
                tick_interval: Duration::from_millis(20),
                max_concurrency: max,
                timezone: Tz::UTC,
            },
        )
    }

    async fn wait_until_idle(trigger: &TriggerLoop) {
        for _ in 0..200 {
            if trigger.in_flight.lock().unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("trigger loop did not go idle");
    }

    #[tokio::test]
    async fn spawn_and_graceful_shutdown() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new();
        let handle = trigger(&store, &executor, 4).spawn();
        handle.graceful_shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn due_job_fires_exactly_once_under_overlapping_ticks() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new().with_delay(Duration::from_millis(100));
        let now = Utc::now();
        store
            .create(job("ping", "*/5 * * * *", now - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let trigger = trigger(&store, &executor, 4);
        tokio::join!(trigger.tick(now), trigger.tick(now));
        wait_until_idle(&trigger).await;

        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn overdue_job_fires_once_and_reschedules_from_now() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new();
        let now = Utc::now();
        // Idle well past several due instants.
        store
            .create(job("ping", "*/5 * * * *", now - TimeDelta::minutes(12)))
            .await
            .unwrap();

        let trigger = trigger(&store, &executor, 4);
        trigger.tick(now).await;
        wait_until_idle(&trigger).await;

        assert_eq!(executor.call_count(), 1);
        let rescheduled = store.get(&"ping".into()).await.unwrap();
        assert!(rescheduled.next_fire_at > now);
        assert!(rescheduled.next_fire_at <= now + TimeDelta::minutes(5) + TimeDelta::seconds(5));
    }

    #[tokio::test]
    async fn failed_execution_is_recorded_and_scheduling_continues() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new().failing();
        let now = Utc::now();
        store
            .create(job("ping", "*/5 * * * *", now - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let trigger = trigger(&store, &executor, 4);
        trigger.tick(now).await;
        wait_until_idle(&trigger).await;

        let page = store.query(&"ping".into(), 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert!(!page.items[0].ok);
        assert_eq!(page.items[0].status_code, None);
        assert!(page.items[0].error.is_some());

        // The failure does not affect the schedule.
        assert!(store.get(&"ping".into()).await.unwrap().next_fire_at > now);
    }

    #[tokio::test]
    async fn deletion_during_firing_keeps_the_run_record() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new().with_delay(Duration::from_millis(150));
        let now = Utc::now();
        store
            .create(job("ping", "*/5 * * * *", now - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let trigger = trigger(&store, &executor, 4);
        trigger.tick(now).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        store.delete(&"ping".into()).await.unwrap();
        wait_until_idle(&trigger).await;

        let page = store.query(&"ping".into(), 10, 0).await.unwrap();
        assert_eq!(page.total, 1);
        assert_matches!(
            store.get(&"ping".into()).await,
            Err(StoreError::NotFound(_))
        );

        // No further firings are scheduled.
        trigger.tick(Utc::now()).await;
        wait_until_idle(&trigger).await;
        assert_eq!(executor.call_count(), 1);
    }

    #[tokio::test]
    async fn saturated_pool_defers_jobs_to_the_next_tick() {
        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new().with_delay(Duration::from_millis(100));
        let now = Utc::now();
        store
            .create(job("first", "*/5 * * * *", now - TimeDelta::seconds(2)))
            .await
            .unwrap();
        store
            .create(job("second", "*/5 * * * *", now - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let trigger = trigger(&store, &executor, 1);
        trigger.tick(now).await;
        wait_until_idle(&trigger).await;
        assert_eq!(executor.call_count(), 1);

        trigger.tick(Utc::now()).await;
        wait_until_idle(&trigger).await;
        assert_eq!(executor.call_count(), 2);

        let called: Vec<String> = executor
            .calls
            .lock()
            .unwrap()
            .iter()
            .map(|action| action.url.clone())
            .collect();
        assert_eq!(
            called,
            vec![
                "http://example.com/first".to_owned(),
                "http://example.com/second".to_owned(),
            ]
        );
    }

    #[tokio::test]
    async fn ledger_failure_does_not_block_rescheduling() {
        struct FailingLedger;

        #[async_trait]
        impl RunLedger for FailingLedger {
            async fn append(&self, _record: crate::ledger::RunRecord) -> Result<(), StoreError> {
                Err(StoreError::Unavailable("ledger down".to_owned()))
            }
            async fn query(
                &self,
                _job_id: &JobId,
                _limit: u64,
                _offset: u64,
            ) -> Result<crate::ledger::RunPage, StoreError> {
                Err(StoreError::Unavailable("ledger down".to_owned()))
            }
        }

        let store = InMemoryStore::new();
        let executor = RecordingExecutor::new();
        let now = Utc::now();
        store
            .create(job("ping", "*/5 * * * *", now - TimeDelta::seconds(1)))
            .await
            .unwrap();

        let trigger = TriggerLoop::new(
            Arc::new(store.clone()),
            Arc::new(FailingLedger),
            Arc::new(executor.clone()),
            TriggerConfig::default(),
        );
        trigger.tick(now).await;
        wait_until_idle(&trigger).await;

        assert_eq!(executor.call_count(), 1);
        assert!(store.get(&"ping".into()).await.unwrap().next_fire_at > now);
    }
}
