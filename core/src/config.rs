//! Dispatcher configuration and validation.
//!
//! All tuning parameters live in one struct with production defaults.
//! Validation happens once at startup; an invalid configuration is fatal and
//! the process exits non-zero.

use std::time::Duration;
use thiserror::Error;

/// Error raised for an invalid configuration value.
///
/// Configuration errors are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The database DSN is missing or empty.
    #[error("database DSN is required (set --database-url or DATABASE_URL)")]
    MissingDsn,

    /// A numeric tuning value is outside its permitted range.
    #[error("{field} must be at least {min}, got {got}")]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Minimum permitted value.
        min: u64,
        /// The rejected value.
        got: u64,
    },
}

/// Tuning parameters for the dispatcher.
///
/// # Default Values
///
/// - `workers`: 1
/// - `batch_size`: 10
/// - `poll_interval`: 5 seconds
/// - `max_attempts`: 5
/// - `retry_backoff`: 30 seconds
/// - `max_parallel`: 10
/// - `connect_timeout`: 10 seconds
/// - `query_timeout`: 30 seconds
/// - HTTP surface on `127.0.0.1:8080`, enabled
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// Number of worker instances, each with its own database connection.
    pub workers: u32,
    /// Maximum rows claimed per worker iteration.
    ///
    /// Row locks are held from claim until the batch's outcomes commit, so
    /// this should stay at or below the number of rows the slowest expected
    /// handler mix can complete in a bounded interval. Large batches with
    /// long-running handlers hold locks and stall other workers.
    pub batch_size: u32,
    /// Sleep between iterations when no rows are due.
    pub poll_interval: Duration,
    /// Attempts after which a failing row goes to `dead`.
    pub max_attempts: u32,
    /// Fixed delay applied to a row on transition to `retry`.
    pub retry_backoff: Duration,
    /// Maximum concurrently executing handlers per worker.
    pub max_parallel: usize,
    /// Database connect timeout.
    pub connect_timeout: Duration,
    /// Per-statement timeout applied to the database session.
    pub query_timeout: Duration,
    /// Bind host for the observability HTTP surface.
    pub http_host: String,
    /// Bind port for the observability HTTP surface.
    pub http_port: u16,
    /// Whether to serve the observability HTTP surface at all.
    pub http_enabled: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            workers: 1,
            batch_size: 10,
            poll_interval: Duration::from_secs(5),
            max_attempts: 5,
            retry_backoff: Duration::from_secs(30),
            max_parallel: 10,
            connect_timeout: Duration::from_secs(10),
            query_timeout: Duration::from_secs(30),
            http_host: "127.0.0.1".to_string(),
            http_port: 8080,
            http_enabled: true,
        }
    }
}

impl DispatcherConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the DSN is empty or any tuning value is
    /// out of range (`workers`, `batch_size`, `max_attempts`, `max_parallel`
    /// and `poll_interval` must all be at least 1).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::MissingDsn);
        }
        Self::at_least("workers", u64::from(self.workers), 1)?;
        Self::at_least("batch_size", u64::from(self.batch_size), 1)?;
        Self::at_least("max_attempts", u64::from(self.max_attempts), 1)?;
        Self::at_least("max_parallel", self.max_parallel as u64, 1)?;
        Self::at_least("poll_interval", self.poll_interval.as_secs(), 1)?;
        Ok(())
    }

    const fn at_least(field: &'static str, got: u64, min: u64) -> Result<(), ConfigError> {
        if got < min {
            return Err(ConfigError::OutOfRange { field, min, got });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    fn valid_config() -> DispatcherConfig {
        DispatcherConfig {
            database_url: "postgres://localhost/outbox".to_string(),
            ..DispatcherConfig::default()
        }
    }

    #[test]
    fn default_values_match_documented_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.workers, 1);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.retry_backoff, Duration::from_secs(30));
        assert_eq!(config.max_parallel, 10);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert!(config.http_enabled);
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_dsn_is_rejected() {
        let config = DispatcherConfig {
            database_url: "  ".to_string(),
            ..valid_config()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingDsn)));
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = DispatcherConfig {
            batch_size: 0,
            ..valid_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = DispatcherConfig {
            workers: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_attempts_is_rejected() {
        let config = DispatcherConfig {
            max_attempts: 0,
            ..valid_config()
        };
        assert!(config.validate().is_err());
    }
}
