//! Liveness, readiness and metrics endpoints.
//!
//! `/health` answers 200 whenever the process is alive and checks nothing
//! else. `/ready` performs a fresh database ping through a short-lived
//! repository and answers 503 while the database is unreachable, which is
//! what load balancers and rollout gates should watch.

use crate::state::AppState;
use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// `GET /health`: liveness.
#[allow(clippy::unused_async)]
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// `GET /ready`: readiness, backed by a fresh database ping.
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.repository().await {
        Ok(mut repository) => {
            if repository.is_connected().await {
                (StatusCode::OK, Json(json!({"status": "ready"})))
            } else {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"status": "not ready", "reason": "database ping failed"})),
                )
            }
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "not ready", "reason": e.to_string()})),
        ),
    }
}

/// `GET /metrics`: Prometheus text exposition, or 501 when no recorder is
/// configured.
#[allow(clippy::unused_async)]
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (
            StatusCode::NOT_IMPLEMENTED,
            Json(json!({"error": "metrics not configured"})),
        )
            .into_response(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum_test::TestServer;

    fn test_server() -> TestServer {
        // DSN points at a closed port so readiness fails fast.
        let state = AppState::new("postgres://postgres@127.0.0.1:9/outbox");
        TestServer::new(crate::router(state)).expect("router should build")
    }

    #[tokio::test]
    async fn health_is_ok_without_database() {
        let server = test_server();
        let response = server.get("/health").await;
        response.assert_status_ok();
        assert_eq!(response.json::<serde_json::Value>()["status"], "ok");
    }

    #[tokio::test]
    async fn ready_is_unavailable_when_database_is_down() {
        let server = test_server();
        let response = server.get("/ready").await;
        response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["status"], "not ready");
        assert!(body["reason"].is_string());
    }

    #[tokio::test]
    async fn metrics_is_not_implemented_without_recorder() {
        let server = test_server();
        let response = server.get("/metrics").await;
        response.assert_status(StatusCode::NOT_IMPLEMENTED);
    }
}
