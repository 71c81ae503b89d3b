//! Execution of job HTTP actions.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use crate::job::{HttpAction, HttpMethod, Job};
use crate::ledger::RunRecord;

/// The default bound on a single outbound call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Status codes below this threshold count as a successful firing.
pub const DEFAULT_SUCCESS_BELOW: u16 = 400;

/// Stored response bodies are clipped to this many bytes.
const RESPONSE_EXCERPT_MAX: usize = 4096;

/// The observable result of one firing attempt.
///
/// `status_code` is `None` when the call never completed; `elapsed_ms` is
/// measured up to the point of completion or failure either way.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status_code: Option<u16>,
    pub ok: bool,
    pub response_text: Option<String>,
    pub elapsed_ms: f64,
    pub error: Option<String>,
}

impl RunOutcome {
    /// Snapshots this outcome into a ledger record for `job`.
    pub fn into_record(self, job: &Job, run_at: DateTime<Utc>) -> RunRecord {
        RunRecord {
            job_id: job.id.clone(),
            url: job.action.url.clone(),
            cron: job.cron.clone(),
            method: job.action.method,
            status_code: self.status_code,
            ok: self.ok,
            response_text: self.response_text,
            elapsed_ms: self.elapsed_ms,
            error: self.error,
            run_at,
        }
    }
}

/// Performs one action attempt. The executor never retries internally: retry
/// policy, if any, belongs to the caller.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &HttpAction) -> RunOutcome;
}

/// [`ActionExecutor`] performing real HTTP calls with a bounded timeout.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: Client,
    timeout: Duration,
    success_below: u16,
}

impl HttpExecutor {
    /// Creates an executor whose calls are bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout,
            success_below: DEFAULT_SUCCESS_BELOW,
        })
    }

    /// Overrides the status-code threshold below which a response counts as
    /// successful.
    pub fn with_success_below(mut self, threshold: u16) -> Self {
        self.success_below = threshold;
        self
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(value: HttpMethod) -> Self {
        match value {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

#[async_trait]
impl ActionExecutor for HttpExecutor {
    async fn execute(&self, action: &HttpAction) -> RunOutcome {
        let start = Instant::now();
        let mut request = self
            .client
            .request(action.method.into(), action.url.as_str());
        if let Some(headers) = &action.headers {
            for (name, value) in headers {
                request = request.header(name, value);
            }
        }
        if let Some(body) = &action.body {
            request = request.body(body.clone());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let text = response.text().await.ok().map(excerpt);
                RunOutcome {
                    status_code: Some(status),
                    ok: status < self.success_below,
                    response_text: text,
                    elapsed_ms: elapsed_ms(start),
                    error: None,
                }
            }
            Err(err) => {
                let error = if err.is_timeout() {
                    format!("request timed out after {:?}", self.timeout)
                } else {
                    err.to_string()
                };
                RunOutcome {
                    status_code: None,
                    ok: false,
                    response_text: None,
                    elapsed_ms: elapsed_ms(start),
                    error: Some(error),
                }
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn excerpt(mut text: String) -> String {
    if text.len() > RESPONSE_EXCERPT_MAX {
        let boundary = (0..=RESPONSE_EXCERPT_MAX)
            .rev()
            .find(|index| text.is_char_boundary(*index))
            .unwrap_or(0);
        text.truncate(boundary);
    }
    text
}
