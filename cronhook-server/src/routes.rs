//! HTTP route definitions.
//!
//! ```text
//! POST   /jobs              - register a job
//! GET    /jobs/{id}         - job definition plus live schedule
//! DELETE /jobs/{id}         - remove a job
//! POST   /jobs/{id}/pause   - stop firing without removing
//! POST   /jobs/{id}/resume  - re-enable a paused job
//! GET    /jobs/{id}/runs    - paginated run history, newest first
//! GET    /health            - liveness
//! ```

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    create_job, delete_job, get_job, health, list_runs, pause_job, resume_job, AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/jobs", post(create_job))
        .route("/jobs/{id}", get(get_job).delete(delete_job))
        .route("/jobs/{id}/pause", post(pause_job))
        .route("/jobs/{id}/resume", post(resume_job))
        .route("/jobs/{id}/runs", get(list_runs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
