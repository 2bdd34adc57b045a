//! Observability HTTP surface for the outboxd dispatcher.
//!
//! Serves liveness/readiness probes, Prometheus metrics and the dead-event
//! inspection/retry API:
//!
//! ```text
//! GET  /health                        liveness
//! GET  /ready                         readiness (fresh database ping)
//! GET  /metrics                       Prometheus exposition (501 if unset)
//! GET  /api/dead-events               paginated dead-event listing
//! GET  /api/dead-events/stats         dead-event count
//! GET  /api/dead-events/{id}          one dead event
//! POST /api/dead-events/{id}/retry    reset one dead event to pending
//! POST /api/dead-events/retry-batch   reset many dead events
//! ```
//!
//! Every request that touches the database constructs its own short-lived
//! repository with tight timeouts; the surface never shares a worker's
//! connection and never changes the schedule or connection count of worker
//! instances.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod handlers;
pub mod state;

pub use error::AppError;
pub use state::AppState;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

/// Build the observability router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .route("/api/dead-events", get(handlers::dead_events::list))
        .route("/api/dead-events/stats", get(handlers::dead_events::stats))
        .route("/api/dead-events/:id", get(handlers::dead_events::get_one))
        .route("/api/dead-events/:id/retry", post(handlers::dead_events::retry))
        .route("/api/dead-events/retry-batch", post(handlers::dead_events::retry_batch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the router until the stop signal fires.
///
/// In-flight requests are drained gracefully on shutdown.
///
/// # Errors
///
/// Returns the underlying I/O error if serving fails.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let app = router(state);
    tracing::info!(addr = ?listener.local_addr().ok(), "observability surface listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
}
