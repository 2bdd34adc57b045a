//! A single dispatch instance: one repository, one bounded executor.

use futures::StreamExt;
use outboxd_core::config::DispatcherConfig;
use outboxd_core::event::{EventStatus, OutboxEvent};
use outboxd_core::registry::{EventHandler, HandlerError, HandlerRegistry};
use outboxd_postgres::{Repository, RepositoryError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Tuning parameters for one worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Display name, used in every log line (`worker-<idx>-<pid>`).
    pub name: String,
    /// Maximum rows claimed per iteration.
    ///
    /// Row locks are held for the whole batch while handlers run, so keep
    /// this at or below what the slowest handler mix can finish in a
    /// bounded interval; a large batch of long-running handlers stalls
    /// other workers on nothing.
    pub batch_size: u32,
    /// Sleep between iterations when no rows are due.
    pub poll_interval: Duration,
    /// Attempts after which a failing row goes to `dead`.
    pub max_attempts: u32,
    /// Fixed delay applied to a row on transition to `retry`.
    pub retry_backoff: Duration,
    /// Maximum concurrently executing handlers.
    pub max_parallel: usize,
}

impl WorkerConfig {
    /// Derive a worker's configuration from the dispatcher configuration.
    #[must_use]
    pub fn from_dispatcher(name: impl Into<String>, config: &DispatcherConfig) -> Self {
        Self {
            name: name.into(),
            batch_size: config.batch_size,
            poll_interval: config.poll_interval,
            max_attempts: config.max_attempts,
            retry_backoff: config.retry_backoff,
            max_parallel: config.max_parallel,
        }
    }
}

/// One dispatch instance.
///
/// The main loop is single-task; only handler execution is off-loaded, each
/// handler in its own spawned task with at most `max_parallel` in flight.
/// The repository connection is engine-private: handlers never see it, and
/// a handler needing database access must open its own connection.
pub struct Worker {
    repository: Repository,
    registry: Arc<HandlerRegistry>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    /// Assemble a worker from its parts.
    ///
    /// The registry is a constructor argument (not process state) so tests
    /// can substitute mocks.
    #[must_use]
    pub const fn new(
        repository: Repository,
        registry: Arc<HandlerRegistry>,
        config: WorkerConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            repository,
            registry,
            config,
            shutdown,
        }
    }

    /// Run the dispatch loop until the stop signal fires.
    ///
    /// A stop signal received mid-iteration lets the in-flight batch finish
    /// and commit before the loop exits; no new claims are issued after the
    /// signal. Repository failures abort the iteration (rolling back the
    /// claim) and are retried after a poll interval; they never terminate
    /// the worker.
    pub async fn run(mut self) {
        tracing::info!(
            worker = %self.config.name,
            handlers = self.registry.len(),
            batch_size = self.config.batch_size,
            max_parallel = self.config.max_parallel,
            "worker started"
        );

        while !self.should_stop() {
            if let Err(e) = self.repository.ensure_connected().await {
                tracing::warn!(worker = %self.config.name, error = %e, "database unavailable");
                self.sleep_poll_interval().await;
                continue;
            }

            match self.run_iteration().await {
                Ok(0) => self.sleep_poll_interval().await,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        worker = %self.config.name,
                        error = %e,
                        "iteration failed, claim rolled back"
                    );
                    metrics::counter!("outbox.iterations.failed").increment(1);
                    self.sleep_poll_interval().await;
                }
            }
        }

        tracing::info!(worker = %self.config.name, "worker stopped");
    }

    /// One claim-dispatch-commit cycle. Returns the number of rows handled.
    async fn run_iteration(&mut self) -> Result<usize, RepositoryError> {
        let started = Instant::now();
        let config = self.config.clone();
        let registry = Arc::clone(&self.registry);
        let max_attempts = i32::try_from(config.max_attempts).unwrap_or(i32::MAX);

        let mut claim = self.repository.claim(config.batch_size).await?;
        if claim.is_empty() {
            claim.rollback().await?;
            return Ok(0);
        }

        let events = claim.events().to_vec();
        let outcomes = Box::pin(dispatch_batch(&registry, config.max_parallel, &events)).await;

        for event in &events {
            match outcomes.get(&event.id) {
                Some(Ok(())) => {
                    if claim.mark_success(event.id).await? {
                        tracing::info!(
                            worker = %config.name,
                            event_id = event.id,
                            event_type = %event.event_type,
                            attempts = event.attempts + 1,
                            "event dispatched"
                        );
                        metrics::counter!("outbox.events.succeeded").increment(1);
                    } else {
                        tracing::warn!(
                            worker = %config.name,
                            event_id = event.id,
                            "claimed row was no longer claimable on success"
                        );
                    }
                }
                Some(Err(failure)) => {
                    let next = claim
                        .mark_retry_or_dead(
                            event.id,
                            event.attempts,
                            config.retry_backoff,
                            max_attempts,
                        )
                        .await?;
                    log_failure(&config, event, failure, next);
                }
                None => {
                    // Every claimed event gets an outcome; reaching here
                    // means the bookkeeping above is broken.
                    tracing::error!(
                        worker = %config.name,
                        event_id = event.id,
                        "no dispatch outcome recorded for claimed event"
                    );
                }
            }
        }

        claim.commit().await?;
        metrics::histogram!("outbox.batch.duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(events.len())
    }

    /// Sleep one poll interval, waking early on the stop signal.
    async fn sleep_poll_interval(&mut self) {
        tokio::select! {
            () = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    /// Stop when the signal is set or its sender is gone.
    fn should_stop(&self) -> bool {
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }
}

/// Run handlers for a batch concurrently, bounded by `max_parallel`.
///
/// Rows with no registered handler fail deterministically with
/// [`HandlerError::NotFound`] without occupying an executor slot. A handler
/// panic is captured by the task join and converted into a failure outcome.
async fn dispatch_batch(
    registry: &HandlerRegistry,
    max_parallel: usize,
    events: &[OutboxEvent],
) -> HashMap<i64, Result<(), HandlerError>> {
    let mut outcomes = HashMap::with_capacity(events.len());
    let mut tasks = Vec::with_capacity(events.len());

    for event in events {
        match registry.get(&event.event_type) {
            Some(handler) => {
                tasks.push((event.id, Arc::clone(handler), event.payload.clone()));
            }
            None => {
                metrics::counter!("outbox.events.handler_not_found").increment(1);
                outcomes.insert(
                    event.id,
                    Err(HandlerError::NotFound {
                        event_type: event.event_type.clone(),
                    }),
                );
            }
        }
    }

    let completed = futures::stream::iter(tasks)
        .map(|task| {
            Box::pin(run_handler_task(task))
                as std::pin::Pin<
                    Box<dyn std::future::Future<Output = (i64, Result<(), HandlerError>)> + Send>,
                >
        })
        .buffer_unordered(max_parallel)
        .collect::<Vec<_>>()
        .await;

    outcomes.extend(completed);
    outcomes
}

/// Run one claimed event's handler and report its outcome.
async fn run_handler_task(
    task: (i64, EventHandler, serde_json::Value),
) -> (i64, Result<(), HandlerError>) {
    let (id, handler, payload) = task;
    let outcome = match tokio::spawn(handler(payload)).await {
        Ok(result) => result,
        Err(join_error) => Err(HandlerError::failed(format!("handler panicked: {join_error}"))),
    };
    (id, outcome)
}

fn log_failure(
    config: &WorkerConfig,
    event: &OutboxEvent,
    failure: &HandlerError,
    next: Option<EventStatus>,
) {
    match next {
        Some(EventStatus::Dead) => {
            tracing::error!(
                worker = %config.name,
                event_id = event.id,
                event_type = %event.event_type,
                attempts = event.attempts + 1,
                error = %failure,
                "event exhausted attempts, moved to dead letter queue"
            );
            metrics::counter!("outbox.events.dead").increment(1);
        }
        Some(_) => {
            tracing::warn!(
                worker = %config.name,
                event_id = event.id,
                event_type = %event.event_type,
                attempts = event.attempts + 1,
                backoff_secs = config.retry_backoff.as_secs(),
                error = %failure,
                "event failed, scheduled for retry"
            );
            metrics::counter!("outbox.events.retried").increment(1);
        }
        None => {
            tracing::warn!(
                worker = %config.name,
                event_id = event.id,
                "claimed row was no longer claimable on failure"
            );
        }
    }
}
