//! Command-line interface.

use clap::{Args, Parser, Subcommand};
use outboxd_core::config::DispatcherConfig;
use std::time::Duration;

/// Transactional outbox dispatcher for `PostgreSQL`.
#[derive(Parser, Debug)]
#[command(name = "outboxd", version, about)]
pub struct Cli {
    /// Action to perform.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the dispatcher (workers + observability surface).
    Run(RunArgs),
}

/// Flags for the `run` subcommand. Each maps to one tuning parameter.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// PostgreSQL connection string.
    #[arg(long = "database-url", env = "DATABASE_URL", value_name = "DSN")]
    pub database_url: Option<String>,

    /// Number of worker instances, each with its own database connection.
    #[arg(long, default_value_t = 1)]
    pub workers: u32,

    /// Maximum rows claimed per worker iteration.
    #[arg(long = "batch-size", default_value_t = 10)]
    pub batch_size: u32,

    /// Seconds to sleep between iterations when no rows are due.
    #[arg(long = "poll-interval", value_name = "SECONDS", default_value_t = 5)]
    pub poll_interval: u64,

    /// Attempts after which a failing row goes to the dead letter queue.
    #[arg(long = "max-attempts", default_value_t = 5)]
    pub max_attempts: u32,

    /// Seconds a failed row waits before its next attempt.
    #[arg(long = "retry-backoff", value_name = "SECONDS", default_value_t = 30)]
    pub retry_backoff: u64,

    /// Maximum concurrently executing handlers per worker.
    #[arg(long = "max-parallel", default_value_t = 10)]
    pub max_parallel: usize,

    /// Database connect timeout in seconds.
    #[arg(long = "connect-timeout", value_name = "SECONDS", default_value_t = 10)]
    pub connect_timeout: u64,

    /// Per-statement database timeout in seconds.
    #[arg(long = "query-timeout", value_name = "SECONDS", default_value_t = 30)]
    pub query_timeout: u64,

    /// Bind host for the observability HTTP surface.
    #[arg(long = "http-host", default_value = "127.0.0.1")]
    pub http_host: String,

    /// Bind port for the observability HTTP surface.
    #[arg(long = "http-port", default_value_t = 8080)]
    pub http_port: u16,

    /// Disable the observability HTTP surface entirely.
    #[arg(long = "no-http", default_value_t = false)]
    pub no_http: bool,

    /// Log level filter (overridden by RUST_LOG when set).
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,
}

impl RunArgs {
    /// Map the flags onto the dispatcher configuration.
    #[must_use]
    pub fn into_config(self) -> DispatcherConfig {
        DispatcherConfig {
            database_url: self.database_url.unwrap_or_default(),
            workers: self.workers,
            batch_size: self.batch_size,
            poll_interval: Duration::from_secs(self.poll_interval),
            max_attempts: self.max_attempts,
            retry_backoff: Duration::from_secs(self.retry_backoff),
            max_parallel: self.max_parallel,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            query_timeout: Duration::from_secs(self.query_timeout),
            http_host: self.http_host,
            http_port: self.http_port,
            http_enabled: !self.no_http,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn run_defaults_match_dispatcher_defaults() {
        let cli = Cli::try_parse_from(["outboxd", "run", "--database-url", "postgres://x/y"])
            .expect("args parse");
        let Command::Run(args) = cli.command;
        let config = args.into_config();

        let defaults = DispatcherConfig::default();
        assert_eq!(config.workers, defaults.workers);
        assert_eq!(config.batch_size, defaults.batch_size);
        assert_eq!(config.poll_interval, defaults.poll_interval);
        assert_eq!(config.max_attempts, defaults.max_attempts);
        assert_eq!(config.retry_backoff, defaults.retry_backoff);
        assert_eq!(config.max_parallel, defaults.max_parallel);
        assert!(config.http_enabled);
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "outboxd",
            "run",
            "--database-url",
            "postgres://x/y",
            "--workers",
            "4",
            "--batch-size",
            "50",
            "--retry-backoff",
            "1",
            "--no-http",
        ])
        .expect("args parse");
        let Command::Run(args) = cli.command;
        let config = args.into_config();

        assert_eq!(config.workers, 4);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.retry_backoff, Duration::from_secs(1));
        assert!(!config.http_enabled);
    }

    #[test]
    fn missing_dsn_fails_validation() {
        let cli = Cli::try_parse_from(["outboxd", "run"]).expect("args parse");
        let Command::Run(args) = cli.command;
        let mut args = args;
        args.database_url = None;
        assert!(args.into_config().validate().is_err());
    }
}
