//! Configuration management
//!
//! Values come from the process environment (after `.env` has been loaded by
//! the binary) with defaults held in the constants below.

use crate::retry::RetryPolicy;
use courtside_common::{CourtsideError, Result};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default maximum database connections in the pool.
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Default minimum database connections in the pool.
pub const DEFAULT_DB_MIN_CONNECTIONS: u32 = 1;

/// Default database connection timeout in seconds.
pub const DEFAULT_DB_CONNECT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Retry Configuration Constants
// ============================================================================

/// Default number of retries for a failed batch transaction.
pub const DEFAULT_MAX_RETRIES: u32 = crate::retry::DEFAULT_MAX_RETRIES;

/// Default base delay between retries in milliseconds.
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;

/// Database configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_DB_MAX_CONNECTIONS,
            min_connections: DEFAULT_DB_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: None,
            max_lifetime_secs: None,
        }
    }

    /// Read the database settings; `None` when `DATABASE_URL` is unset
    fn from_lookup<F>(lookup: &F) -> Result<Option<Self>>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(url) = lookup("DATABASE_URL") else {
            return Ok(None);
        };

        Ok(Some(Self {
            url,
            max_connections: parse_or(lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?,
            min_connections: parse_or(lookup, "DB_MIN_CONNECTIONS", DEFAULT_DB_MIN_CONNECTIONS)?,
            connect_timeout_secs: parse_or(
                lookup,
                "DB_CONNECT_TIMEOUT",
                DEFAULT_DB_CONNECT_TIMEOUT_SECS,
            )?,
            idle_timeout_secs: parse_opt(lookup, "DB_IDLE_TIMEOUT")?,
            max_lifetime_secs: parse_opt(lookup, "DB_MAX_LIFETIME")?,
        }))
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(CourtsideError::config("Database URL cannot be empty"));
        }

        if self.max_connections == 0 {
            return Err(CourtsideError::config(
                "Database max_connections must be greater than 0",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(CourtsideError::config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }
}

/// Retry settings for batch transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.base_delay_ms))
    }
}

/// ETL configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EtlConfig {
    /// Absent when `DATABASE_URL` is unset; only dry runs can proceed without it
    pub database: Option<DbConfig>,
    pub retry: RetryConfig,
    pub run_migrations: bool,
}

impl EtlConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            database: DbConfig::from_lookup(&lookup)?,
            retry: RetryConfig {
                max_retries: parse_or(&lookup, "ETL_MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
                base_delay_ms: parse_or(
                    &lookup,
                    "ETL_RETRY_BASE_DELAY_MS",
                    DEFAULT_RETRY_BASE_DELAY_MS,
                )?,
            },
            run_migrations: parse_or(&lookup, "ETL_RUN_MIGRATIONS", false)?,
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(db) = &self.database {
            db.validate()?;
        }
        Ok(())
    }

    /// Database settings, required for anything that writes
    pub fn require_database(&self) -> Result<&DbConfig> {
        self.database
            .as_ref()
            .ok_or_else(|| CourtsideError::config("DATABASE_URL not set"))
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    Ok(parse_opt(lookup, key)?.unwrap_or(default))
}

fn parse_opt<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            CourtsideError::config(format!("{key} has an invalid value: '{raw}'"))
        }),
    }
}
