//! A cron-driven HTTP job scheduler.
//!
//! Clients register jobs keyed by a caller-assigned unique id; each job
//! carries a cron schedule and an HTTP action. The [`trigger::TriggerLoop`]
//! scans the durable [`store::JobStore`] on a fixed interval, fires due
//! actions through an [`executor::ActionExecutor`] bounded by a worker pool,
//! records every attempt in the append-only [`ledger::RunLedger`], and
//! reschedules by recomputing the job's next fire time from its
//! [`cron::CronExpression`].
//!
//! All scheduling state lives in the store, so the process can be restarted
//! with no data loss: on the next tick, an overdue job fires once and
//! reschedules from the firing instant; missed occurrences are never
//! backfilled. Execution is at-least-once; a firing whose fire-time update
//! fails to persist may be re-attempted on a later tick.
//!
//! The store is a seam: [`store::memory::InMemoryStore`] backs tests, and the
//! `cronhook-sqlx` crate provides the durable SQLite implementation used in
//! production.

use thiserror::Error;

pub mod backoff;
pub mod cron;
pub mod executor;
pub mod job;
pub mod ledger;
pub mod prelude;
pub mod service;
pub mod store;
pub mod trigger;

#[derive(Debug, Error)]
pub enum CronhookError {
    #[error("failed to gracefully shut down")]
    GracefulShutdownFailed,
}
