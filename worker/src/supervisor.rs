//! Supervisor: spawns worker instances, propagates shutdown, restarts.

use crate::worker::{Worker, WorkerConfig};
use outboxd_core::config::DispatcherConfig;
use outboxd_core::registry::HandlerRegistry;
use outboxd_postgres::{Repository, RepositoryConfig, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};

/// How long to wait for workers to finish their in-flight batch on shutdown
/// before force-terminating them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Restart backoff for workers that exit abnormally.
const RESTART_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const RESTART_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Spawns N independent worker instances and supervises their lifecycle.
///
/// Each worker owns a dedicated database connection and shares nothing with
/// its siblings except the read-only handler registry and the stop channel,
/// so the total connection count is exactly the worker count. The
/// supervisor itself has no data-plane role: it never touches the database.
///
/// Shutdown: on SIGINT or SIGTERM the stop signal is broadcast, workers
/// finish and commit their current batch, and the supervisor waits up to a
/// grace window before aborting stragglers.
///
/// A worker that exits abnormally (error or panic) before shutdown is
/// logged and respawned with capped exponential backoff.
pub struct Supervisor {
    config: DispatcherConfig,
    registry: Arc<HandlerRegistry>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Create a supervisor for `config.workers` instances.
    #[must_use]
    pub fn new(config: DispatcherConfig, registry: Arc<HandlerRegistry>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            registry,
            shutdown_tx,
        }
    }

    /// A receiver on the stop channel, for collaborators (e.g. the HTTP
    /// surface) that shut down together with the workers.
    #[must_use]
    pub fn subscribe_shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn the workers and supervise until shutdown completes.
    pub async fn run(self) {
        let Self {
            config,
            registry,
            shutdown_tx,
        } = self;
        let pid = std::process::id();

        let signal_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("termination signal received, stopping workers");
            let _ = signal_tx.send(true);
        });

        let mut join_set: JoinSet<Result<(), RepositoryError>> = JoinSet::new();
        let mut worker_of_task: HashMap<Id, u32> = HashMap::new();
        let mut backoffs: HashMap<u32, Duration> = HashMap::new();

        for idx in 0..config.workers {
            spawn_worker(
                &mut join_set,
                &mut worker_of_task,
                idx,
                pid,
                &config,
                &registry,
                &shutdown_tx,
            );
        }
        tracing::info!(workers = config.workers, "supervisor started");

        let mut shutdown_rx = shutdown_tx.subscribe();
        while !*shutdown_tx.borrow() {
            tokio::select! {
                _ = shutdown_rx.changed() => {}
                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    if *shutdown_tx.borrow() {
                        break;
                    }
                    let idx = handle_abnormal_exit(&joined, &mut worker_of_task);
                    let Some(idx) = idx else { continue };

                    let backoff = backoffs
                        .entry(idx)
                        .and_modify(|d| *d = (*d * 2).min(RESTART_MAX_BACKOFF))
                        .or_insert(RESTART_INITIAL_BACKOFF);
                    tracing::warn!(
                        worker_index = idx,
                        backoff_secs = backoff.as_secs(),
                        "restarting worker after backoff"
                    );
                    tokio::time::sleep(*backoff).await;
                    if *shutdown_tx.borrow() {
                        break;
                    }
                    spawn_worker(
                        &mut join_set,
                        &mut worker_of_task,
                        idx,
                        pid,
                        &config,
                        &registry,
                        &shutdown_tx,
                    );
                }
            }
        }

        drain_with_grace(&mut join_set).await;
        tracing::info!("supervisor stopped");
    }
}

/// Wait for remaining workers, force-terminating after the grace window.
async fn drain_with_grace(join_set: &mut JoinSet<Result<(), RepositoryError>>) {
    let drain = async {
        while join_set.join_next().await.is_some() {}
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        tracing::warn!(
            grace_secs = SHUTDOWN_GRACE.as_secs(),
            "grace window expired, aborting remaining workers"
        );
        join_set.abort_all();
        while join_set.join_next().await.is_some() {}
    }
}

/// Log an abnormal worker exit and return its index for respawning.
///
/// Returns `None` when the exit should not trigger a restart (a cancelled
/// task, or a task we have no record of).
fn handle_abnormal_exit(
    joined: &Result<(Id, Result<(), RepositoryError>), tokio::task::JoinError>,
    worker_of_task: &mut HashMap<Id, u32>,
) -> Option<u32> {
    match joined {
        Ok((task_id, result)) => {
            let idx = worker_of_task.remove(task_id)?;
            match result {
                Ok(()) => {
                    tracing::error!(worker_index = idx, "worker exited unexpectedly");
                }
                Err(e) => {
                    tracing::error!(worker_index = idx, error = %e, "worker failed");
                }
            }
            Some(idx)
        }
        Err(join_error) => {
            let idx = worker_of_task.remove(&join_error.id())?;
            if join_error.is_cancelled() {
                return None;
            }
            tracing::error!(worker_index = idx, error = %join_error, "worker panicked");
            Some(idx)
        }
    }
}

fn spawn_worker(
    join_set: &mut JoinSet<Result<(), RepositoryError>>,
    worker_of_task: &mut HashMap<Id, u32>,
    idx: u32,
    pid: u32,
    config: &DispatcherConfig,
    registry: &Arc<HandlerRegistry>,
    shutdown_tx: &watch::Sender<bool>,
) {
    let name = format!("worker-{idx}-{pid}");
    let repository_config = RepositoryConfig::new(config.database_url.clone())
        .with_connect_timeout(config.connect_timeout)
        .with_statement_timeout(config.query_timeout);
    let worker_config = WorkerConfig::from_dispatcher(name.as_str(), config);
    let registry = Arc::clone(registry);
    let shutdown_rx = shutdown_tx.subscribe();

    let handle = join_set.spawn(async move {
        let repository = Box::pin(Repository::connect(repository_config)).await?;
        let run_fut: std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> =
            Box::pin(Worker::new(repository, registry, worker_config, shutdown_rx).run());
        run_fut.await;
        Ok(())
    });
    worker_of_task.insert(handle.id(), idx);
    tracing::info!(worker = %name, "worker spawned");
}

/// Resolve when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {}
        () = terminate => {}
    }
}
