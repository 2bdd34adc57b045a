//! Dead-event inspection and retry endpoints.
//!
//! The dead-letter queue is a logical view over `outbox_event` rows with
//! `status = 'dead'`. These endpoints list and count them, and reset
//! selected rows to `pending` so the next worker cycle picks them up with a
//! fresh attempt budget.

use crate::error::AppError;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use outboxd_core::event::OutboxEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Query parameters for the dead-event listing.
#[derive(Debug, Deserialize)]
pub struct ListParams {
    /// Page size; the repository clamps to at most 1000.
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Page start.
    #[serde(default)]
    pub offset: i64,
    /// Optional filter on the producer domain tag.
    pub aggregate_type: Option<String>,
    /// Optional filter on the handler-selection key.
    pub event_type: Option<String>,
}

const fn default_limit() -> i64 {
    100
}

/// Response body for the dead-event listing.
#[derive(Debug, Serialize)]
pub struct DeadEventList {
    /// The page of dead events.
    pub events: Vec<OutboxEvent>,
    /// Number of events in this page.
    pub count: usize,
    /// Echo of the requested page size.
    pub limit: i64,
    /// Echo of the requested page start.
    pub offset: i64,
}

/// `GET /api/dead-events`: paginated listing.
///
/// # Errors
///
/// Returns 503 if the database is unreachable, 500 on query failure.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DeadEventList>, AppError> {
    let mut repository = state.repository().await?;
    let events = repository
        .fetch_dead_events(
            params.limit,
            params.offset,
            params.aggregate_type.as_deref(),
            params.event_type.as_deref(),
        )
        .await?;

    Ok(Json(DeadEventList {
        count: events.len(),
        events,
        limit: params.limit,
        offset: params.offset,
    }))
}

/// Query parameters for the dead-event count.
#[derive(Debug, Deserialize)]
pub struct StatsParams {
    /// Optional filter on the producer domain tag.
    pub aggregate_type: Option<String>,
    /// Optional filter on the handler-selection key.
    pub event_type: Option<String>,
}

/// `GET /api/dead-events/stats`: total count of matching dead events.
///
/// # Errors
///
/// Returns 503 if the database is unreachable, 500 on query failure.
pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut repository = state.repository().await?;
    let total = repository
        .count_dead_events(params.aggregate_type.as_deref(), params.event_type.as_deref())
        .await?;
    Ok(Json(json!({"total": total})))
}

/// `GET /api/dead-events/{id}`: one dead event.
///
/// # Errors
///
/// Returns 404 if the row is missing or not dead, 503/500 on database
/// failure.
pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<OutboxEvent>, AppError> {
    let mut repository = state.repository().await?;
    let event = repository
        .get_dead_event(id)
        .await?
        .ok_or_else(|| AppError::not_found("dead event", id))?;
    Ok(Json(event))
}

/// `POST /api/dead-events/{id}/retry`: reset one dead event to pending.
///
/// Resets `attempts` to 0 and `next_run_at` to now; the next worker cycle
/// processes the row normally.
///
/// # Errors
///
/// Returns 404 if the row is missing or not dead, 503/500 on database
/// failure.
pub async fn retry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut repository = state.repository().await?;
    if repository.reset_dead_to_pending(id).await? {
        Ok(Json(json!({"status": "ok", "id": id})))
    } else {
        Err(AppError::not_found("dead event", id))
    }
}

/// Request body for the batch retry endpoint.
#[derive(Debug, Deserialize)]
pub struct RetryBatchRequest {
    /// Ids to reset; non-dead ids are ignored.
    pub event_ids: Vec<i64>,
}

/// `POST /api/dead-events/retry-batch`: reset many dead events.
///
/// Returns the count actually transitioned; ids that are missing or not
/// dead are silently ignored.
///
/// # Errors
///
/// Returns 503 if the database is unreachable, 500 on query failure.
pub async fn retry_batch(
    State(state): State<AppState>,
    Json(request): Json<RetryBatchRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut repository = state.repository().await?;
    let processed = repository
        .reset_dead_to_pending_batch(&request.event_ids)
        .await?;
    Ok(Json(json!({"processed": processed})))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn list_params_default_to_first_page() {
        let params: ListParams = serde_json::from_str("{}").expect("empty params parse");
        assert_eq!(params.limit, 100);
        assert_eq!(params.offset, 0);
        assert!(params.aggregate_type.is_none());
        assert!(params.event_type.is_none());
    }

    #[test]
    fn retry_batch_request_parses_ids() {
        let request: RetryBatchRequest =
            serde_json::from_value(json!({"event_ids": [1, 2, 3]})).expect("request parses");
        assert_eq!(request.event_ids, vec![1, 2, 3]);
    }
}
