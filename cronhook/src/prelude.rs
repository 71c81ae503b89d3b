//! The purpose of this module is to alleviate the need to import many of the
//! `cronhook` types.
//!
//! ```
//! # #![allow(unused_imports)]
//! use cronhook::prelude::*;
//! ```
pub use crate::cron::{CronError, CronExpression};
pub use crate::executor::{ActionExecutor, HttpExecutor, RunOutcome};
pub use crate::job::{HttpAction, HttpMethod, Job, JobId, JobStatus};
pub use crate::ledger::{RunLedger, RunPage, RunRecord};
pub use crate::service::{JobService, JobSpec, ServiceError};
pub use crate::store::{JobStore, StoreError};
pub use crate::trigger::{TriggerConfig, TriggerHandle, TriggerLoop};
pub use crate::CronhookError;
