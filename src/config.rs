use std::time::Duration;

use anyhow::Context;

use crate::AppResult;

pub const DEFAULT_INDEX_URL: &str = "sqlite://parley-index.db?mode=rwc";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub index_url: String,
    pub max_connections: u32,

    /// How often the sync worker retries index writes that failed.
    pub index_retry_interval: Duration,
    /// Attempts per index write before it is dropped and logged.
    pub index_max_attempts: u32,
}

impl Config {
    /// Reads `.env` (if present) and the process environment.
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let database_url = dotenv::var("DATABASE_URL").context("DATABASE_URL must be set")?;

        Ok(Self {
            database_url,
            index_url: dotenv::var("SEARCH_INDEX_URL").unwrap_or_else(|_| DEFAULT_INDEX_URL.to_owned()),
            max_connections: parse_var("MAX_CONNECTIONS", 16)?,
            index_retry_interval: Duration::from_millis(parse_var("INDEX_RETRY_INTERVAL_MS", 5_000)?),
            index_max_attempts: parse_var("INDEX_MAX_ATTEMPTS", 5)?,
        })
    }

    /// Both stores in memory, retrying quickly. Used by tests.
    pub fn in_memory() -> Self {
        Self {
            database_url: "sqlite::memory:".to_owned(),
            index_url: "sqlite::memory:".to_owned(),
            max_connections: 1,
            index_retry_interval: Duration::from_millis(50),
            index_max_attempts: 3,
        }
    }
}

fn parse_var<T>(key: &str, default: T) -> AppResult<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match dotenv::var(key) {
        Ok(raw) => Ok(raw.trim().parse().with_context(|| format!("{key}={raw} is not valid"))?),
        Err(_) => Ok(default),
    }
}
