//! Error type for repository operations.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`crate::Repository`] operations.
///
/// `Connection` and `ConnectTimeout` are transient infrastructure errors:
/// the caller aborts the current iteration (dropping any open claim rolls
/// the transaction back and releases row locks) and the next iteration goes
/// through `ensure_connected`. `SchemaAnomaly` indicates the table does not
/// look like the engine expects; whether it is fatal depends on the field
/// (see the claim path).
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Establishing or re-establishing the connection failed.
    #[error("database connection failed: {0}")]
    Connection(#[source] sqlx::Error),

    /// The connect attempt did not complete within the configured timeout.
    #[error("database connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A query failed (includes statement-timeout cancellation and
    /// connection loss mid-statement).
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// A row read from the store does not match the expected schema.
    #[error("schema anomaly: {0}")]
    SchemaAnomaly(String),
}
