//! Environment-supplied configuration, defaulted when absent.
//!
//! Unset and empty variables fall back to their defaults; a value that is
//! present but unparseable is fatal at boot.

use std::net::SocketAddr;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE_URL: &str = "sqlite:cronhook.db";
const DEFAULT_TIMEZONE: &str = "UTC";
const DEFAULT_REQUEST_TIMEOUT: &str = "10";
const DEFAULT_TICK_INTERVAL: &str = "1";
const DEFAULT_MAX_CONCURRENCY: &str = "16";

#[derive(Debug, Error)]
#[error("invalid value `{value}` for {name}")]
pub struct ConfigError {
    name: &'static str,
    value: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_url: String,
    pub timezone: Tz,
    pub request_timeout: Duration,
    pub tick_interval: Duration,
    pub max_concurrency: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &'static str, default: &str| -> String {
            match lookup(name) {
                Some(value) if !value.is_empty() => value,
                _ => default.to_owned(),
            }
        };

        let max_concurrency: usize =
            parse("MAX_CONCURRENCY", get("MAX_CONCURRENCY", DEFAULT_MAX_CONCURRENCY))?;
        if max_concurrency == 0 {
            return Err(ConfigError {
                name: "MAX_CONCURRENCY",
                value: "0".to_owned(),
            });
        }

        Ok(Self {
            bind_addr: parse("CRONHOOK_BIND", get("CRONHOOK_BIND", DEFAULT_BIND))?,
            database_url: get("DATABASE_URL", DEFAULT_DATABASE_URL),
            timezone: parse("SCHEDULER_TZ", get("SCHEDULER_TZ", DEFAULT_TIMEZONE))?,
            request_timeout: parse_seconds(
                "REQUEST_TIMEOUT",
                get("REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT),
            )?,
            tick_interval: parse_seconds(
                "TICK_INTERVAL",
                get("TICK_INTERVAL", DEFAULT_TICK_INTERVAL),
            )?,
            max_concurrency,
        })
    }
}

fn parse<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError { name, value })
}

fn parse_seconds(name: &'static str, value: String) -> Result<Duration, ConfigError> {
    let seconds = value
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds > 0.0)
        .ok_or_else(|| ConfigError {
            name,
            value: value.clone(),
        })?;
    Ok(Duration::from_secs_f64(seconds))
}
