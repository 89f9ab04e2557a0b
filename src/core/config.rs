//! Environment-based configuration
//!
//! All knobs come from environment variables (optionally loaded from a `.env`
//! file by the binary before construction). Missing variables fall back to
//! defaults; unparseable values are fatal at startup.

use anyhow::{Context, Result};

/// Default location of the SQLite database file.
pub const DEFAULT_DATABASE_PATH: &str = "db.sqlite";

/// Default delivery poll period in seconds.
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 10;

/// Default retry ceiling after which a reminder is abandoned.
pub const DEFAULT_MAX_NUM_TRIES: i64 = 10;

/// Runtime configuration for the bot process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Seconds between delivery poll cycles.
    pub poll_interval_seconds: u64,
    /// Maximum delivery attempts per reminder.
    pub max_num_tries: i64,
    /// Default log filter for env_logger.
    pub log_level: String,
}

impl Config {
    /// Build a Config from environment variables.
    ///
    /// Recognized variables:
    /// - `DATABASE_PATH` (default `db.sqlite`)
    /// - `POLL_INTERVAL_SECONDS` (default 10; zero falls back to the default)
    /// - `MAX_NUM_TRIES` (default 10; negative falls back to the default)
    /// - `LOG_LEVEL` (default `info`)
    pub fn from_env() -> Result<Self> {
        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| DEFAULT_DATABASE_PATH.to_string());

        let poll_interval_seconds = match std::env::var("POLL_INTERVAL_SECONDS") {
            Ok(raw) => raw
                .parse::<u64>()
                .with_context(|| format!("invalid POLL_INTERVAL_SECONDS: {raw}"))?,
            Err(_) => DEFAULT_POLL_INTERVAL_SECONDS,
        };

        let max_num_tries = match std::env::var("MAX_NUM_TRIES") {
            Ok(raw) => raw
                .parse::<i64>()
                .with_context(|| format!("invalid MAX_NUM_TRIES: {raw}"))?,
            Err(_) => DEFAULT_MAX_NUM_TRIES,
        };

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Config {
            database_path,
            poll_interval_seconds: if poll_interval_seconds == 0 {
                DEFAULT_POLL_INTERVAL_SECONDS
            } else {
                poll_interval_seconds
            },
            max_num_tries: if max_num_tries < 0 {
                DEFAULT_MAX_NUM_TRIES
            } else {
                max_num_tries
            },
            log_level,
        })
    }
}
