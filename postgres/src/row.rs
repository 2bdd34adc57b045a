//! Mapping from database rows to [`OutboxEvent`] values.

use crate::error::RepositoryError;
use chrono::{DateTime, Utc};
use outboxd_core::event::{EventStatus, OutboxEvent};
use sqlx::Row;
use sqlx::postgres::PgRow;

/// The column list every event query selects, in `event_from_row` order.
pub(crate) const EVENT_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, \
     status, attempts, next_run_at, created_at";

/// Decode a full event from a row.
///
/// A missing or null `next_run_at` (or any other undecodable column) means
/// the table does not match the engine's schema and fails loudly as a
/// [`RepositoryError::SchemaAnomaly`].
pub(crate) fn event_from_row(row: &PgRow) -> Result<OutboxEvent, RepositoryError> {
    let id: i64 = get(row, "id")?;
    let status_str: String = get(row, "status")?;
    let status = EventStatus::parse(&status_str)
        .map_err(|e| RepositoryError::SchemaAnomaly(format!("row {id}: {e}")))?;
    let next_run_at: DateTime<Utc> = row.try_get("next_run_at").map_err(|e| {
        RepositoryError::SchemaAnomaly(format!("row {id} has no usable next_run_at: {e}"))
    })?;

    Ok(OutboxEvent {
        id,
        aggregate_type: get(row, "aggregate_type")?,
        aggregate_id: get(row, "aggregate_id")?,
        event_type: get(row, "event_type")?,
        payload: get(row, "payload")?,
        status,
        attempts: get(row, "attempts")?,
        next_run_at,
        created_at: get(row, "created_at")?,
    })
}

/// Decode a claimed row, applying the skip rules for non-fatal anomalies.
///
/// Returns `Ok(None)` (after logging) when the row has no decodable `id` or
/// carries an unknown status: such rows are skipped, not dispatched, and
/// must not crash the worker. Every other decode failure propagates.
pub(crate) fn claimed_event_from_row(row: &PgRow) -> Result<Option<OutboxEvent>, RepositoryError> {
    let Ok(id) = row.try_get::<i64, _>("id") else {
        tracing::warn!("claimed row has no decodable id, skipping");
        metrics::counter!("outbox.schema_anomalies").increment(1);
        return Ok(None);
    };

    let status_str: String = get(row, "status")?;
    if EventStatus::parse(&status_str).is_err() {
        tracing::warn!(event_id = id, status = %status_str, "claimed row has unknown status, skipping");
        metrics::counter!("outbox.schema_anomalies").increment(1);
        return Ok(None);
    }

    event_from_row(row).map(Some)
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, RepositoryError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column)
        .map_err(|e| RepositoryError::SchemaAnomaly(format!("column {column}: {e}")))
}
