//! The cronhook service binary: wires the SQLite store, the trigger loop and
//! the HTTP surface together, with lifecycle tied to process signals.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use cronhook::executor::HttpExecutor;
use cronhook::service::JobService;
use cronhook::trigger::{TriggerConfig, TriggerLoop};
use cronhook_sqlx::SqliteStore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::handlers::AppState;

mod config;
mod error;
mod handlers;
mod routes;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("invalid DATABASE_URL")?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .connect_with(options)
        .await
        .context("failed to open the job store")?;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    store
        .migrate()
        .await
        .context("failed to run store migrations")?;

    let executor = Arc::new(
        HttpExecutor::new(config.request_timeout)
            .context("failed to build the HTTP executor")?,
    );
    let service = Arc::new(JobService::new(
        store.clone(),
        store.clone(),
        config.timezone,
    ));
    let trigger = TriggerLoop::new(
        store.clone(),
        store,
        executor,
        TriggerConfig {
            tick_interval: config.tick_interval,
            max_concurrency: config.max_concurrency,
            timezone: config.timezone,
        },
    );
    let trigger_handle = trigger.spawn();
    tracing::info!(timezone = %config.timezone, "scheduler started");

    let app = routes::router(AppState { service });
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    trigger_handle.graceful_shutdown().await?;
    pool.close().await;
    tracing::info!("scheduler stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
