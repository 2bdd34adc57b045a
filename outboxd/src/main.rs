//! outboxd: transactional outbox dispatcher for `PostgreSQL`.
//!
//! Producers insert rows into `outbox_event` inside their own business
//! transaction; this process drains due rows, invokes the handler registered
//! for each row's `event_type`, and records success, retry-with-backoff or
//! dead-letter outcomes with at-least-once delivery.
//!
//! Exit codes: 0 on clean shutdown, non-zero on configuration error or
//! unrecoverable startup failure.

use anyhow::Context;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use outboxd_core::registry::HandlerRegistry;
use outboxd_web::AppState;
use outboxd_worker::Supervisor;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Command::Run(args) = cli.command;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = args.into_config();
    config.validate().context("invalid configuration")?;

    let registry = Arc::new(builtin_registry());
    tracing::info!(
        workers = config.workers,
        batch_size = config.batch_size,
        handlers = registry.len(),
        "starting outboxd"
    );

    let supervisor = Supervisor::new(config.clone(), Arc::clone(&registry));

    if config.http_enabled {
        let mut state = AppState::new(config.database_url.clone());
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => state = state.with_metrics(handle),
            Err(e) => tracing::warn!(error = %e, "metrics recorder not installed"),
        }

        let addr = format!("{}:{}", config.http_host, config.http_port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind observability surface on {addr}"))?;

        let shutdown = supervisor.subscribe_shutdown();
        tokio::spawn(async move {
            if let Err(e) = outboxd_web::serve(listener, state, shutdown).await {
                tracing::error!(error = %e, "observability surface failed");
            }
        });
    }

    supervisor.run().await;
    tracing::info!("outboxd shut down cleanly");
    Ok(())
}

/// Handlers shipped with the binary.
///
/// Only `outbox.ping` is built in, for smoke-testing a deployment end to
/// end. Real deployments embed their domain handlers by constructing a
/// [`HandlerRegistry`] and driving [`Supervisor`] from their own binary.
fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("outbox.ping", |payload| async move {
        tracing::info!(payload = %payload, "ping event dispatched");
        Ok(())
    });
    registry
}
