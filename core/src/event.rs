//! The outbox row model and its status state machine.
//!
//! An [`OutboxEvent`] is one row of the `outbox_event` table. The engine only
//! ever moves a row through the transitions below; terminal states are left
//! alone until external tooling (archival, DLQ reset) intervenes.
//!
//! ```text
//! pending ──success──▶ done
//!    │  ╲
//!    │   ╲─failure, attempts+1 <  max ──▶ retry ──(same rules)──▶ done/retry/dead
//!    │
//!    └────failure, attempts+1 >= max ──▶ dead ──explicit DLQ reset──▶ pending
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Error returned when a status string from the store is not a known status.
///
/// Encountering this means the row was written by something newer (or broken)
/// and is treated as a schema anomaly by the repository.
#[derive(Debug, Error)]
#[error("invalid outbox status: {0}")]
pub struct InvalidStatus(pub String);

/// Status of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Freshly inserted by a producer, never dispatched.
    Pending,
    /// Failed at least once, scheduled for another attempt.
    Retry,
    /// Handler completed successfully. Terminal under engine control.
    Done,
    /// Attempts exhausted. Mutated only by an explicit DLQ reset.
    Dead,
}

impl EventStatus {
    /// Convert status to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retry => "retry",
            Self::Done => "done",
            Self::Dead => "dead",
        }
    }

    /// Parse status from its database string representation.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStatus`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, InvalidStatus> {
        match s {
            "pending" => Ok(Self::Pending),
            "retry" => Ok(Self::Retry),
            "done" => Ok(Self::Done),
            "dead" => Ok(Self::Dead),
            other => Err(InvalidStatus(other.to_string())),
        }
    }

    /// Whether the engine may still claim a row in this status.
    ///
    /// `done` and `dead` rows are never claimed and never mutated by the
    /// dispatch loop.
    #[must_use]
    pub const fn is_claimable(&self) -> bool {
        matches!(self, Self::Pending | Self::Retry)
    }
}

/// One row of the `outbox_event` table.
///
/// Immutable by convention: the engine never mutates a constructed event in
/// place; state changes happen in the store and are observed by re-reading.
/// The payload is carried as structured JSON and forwarded to handlers
/// verbatim; it is never round-tripped through a string.
///
/// Serialization (used by the dead-event inspection API) emits the payload
/// as-is and timestamps in RFC 3339.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxEvent {
    /// Store-assigned identifier, stable for the lifetime of the row.
    pub id: i64,

    /// Producer domain tag (e.g. `"order"`).
    pub aggregate_type: String,

    /// Producer identifier within the aggregate type.
    pub aggregate_id: String,

    /// Handler-selection key (e.g. `"order.created"`).
    pub event_type: String,

    /// Opaque JSON payload, forwarded to the handler unchanged.
    pub payload: serde_json::Value,

    /// Current position in the status state machine.
    pub status: EventStatus,

    /// Number of completed dispatch attempts. Monotonically non-decreasing
    /// under engine control; reset to 0 only by an explicit DLQ reset.
    pub attempts: i32,

    /// When the row next becomes eligible for claiming.
    pub next_run_at: DateTime<Utc>,

    /// When the producer inserted the row. Immutable after insert.
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    /// Whether this row is due: claimable status and `next_run_at` has passed.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_run_at <= now
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_roundtrip() {
        for status in &[
            EventStatus::Pending,
            EventStatus::Retry,
            EventStatus::Done,
            EventStatus::Dead,
        ] {
            let s = status.as_str();
            let parsed = EventStatus::parse(s).expect("valid status should parse");
            assert_eq!(*status, parsed);
        }
    }

    #[test]
    fn status_invalid() {
        assert!(EventStatus::parse("processing").is_err());
        assert!(EventStatus::parse("").is_err());
    }

    #[test]
    fn terminal_statuses_are_not_claimable() {
        assert!(EventStatus::Pending.is_claimable());
        assert!(EventStatus::Retry.is_claimable());
        assert!(!EventStatus::Done.is_claimable());
        assert!(!EventStatus::Dead.is_claimable());
    }

    fn sample_event(status: EventStatus, next_run_at: DateTime<Utc>) -> OutboxEvent {
        OutboxEvent {
            id: 1,
            aggregate_type: "order".to_string(),
            aggregate_id: "1001".to_string(),
            event_type: "order.created".to_string(),
            payload: serde_json::json!({"orderId": "1001"}),
            status,
            attempts: 0,
            next_run_at,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn due_requires_claimable_status_and_elapsed_schedule() {
        let now = Utc::now();
        let past = now - Duration::seconds(1);
        let future = now + Duration::seconds(60);

        assert!(sample_event(EventStatus::Pending, past).is_due(now));
        assert!(sample_event(EventStatus::Retry, past).is_due(now));
        assert!(!sample_event(EventStatus::Pending, future).is_due(now));
        assert!(!sample_event(EventStatus::Done, past).is_due(now));
        assert!(!sample_event(EventStatus::Dead, past).is_due(now));
    }

    #[test]
    fn serialization_preserves_payload_structure() {
        let event = sample_event(EventStatus::Dead, Utc::now());
        let json = serde_json::to_value(&event).expect("event should serialize");

        // The payload must come through as a JSON object, not a string.
        assert_eq!(json["payload"]["orderId"], "1001");
        assert_eq!(json["status"], "dead");
        assert_eq!(json["id"], 1);
        assert!(json["next_run_at"].is_string());
    }
}
