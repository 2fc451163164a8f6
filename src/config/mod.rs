//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on missing or unparsable values.
//! The database URL carries credentials and is held as a `SecretString`.

use std::time::Duration;

use crate::error::{Error, Result};
use secrecy::SecretString;

pub const DEFAULT_QUEUE: &str = "harvest_tasks";

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub queue_name: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    /// Seconds a received message stays invisible before it is redelivered.
    pub visibility_timeout_secs: i32,
    pub poll_interval: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        // Zero would leave a read message visible to every other agent.
        let visibility_timeout_secs: i32 = parsed_var("VISIBILITY_TIMEOUT_SECS", 60)?;
        if visibility_timeout_secs <= 0 {
            return Err(Error::Config(format!(
                "VISIBILITY_TIMEOUT_SECS must be positive, got {visibility_timeout_secs}"
            )));
        }

        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            queue_name: optional_var("QUEUE_NAME").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            otel_endpoint: optional_var("OTEL_ENDPOINT"),
            log_level: optional_var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            visibility_timeout_secs,
            poll_interval: Duration::from_millis(parsed_var("POLL_INTERVAL_MS", 1000)?),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    optional_var(name)
        .ok_or_else(|| Error::Config(format!("required environment variable {name} is not set")))
}

/// Unset and blank are the same thing.
fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
    }
}
