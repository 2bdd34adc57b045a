//! The repository: connection lifecycle, claim transactions, outcome
//! mutations and dead-event queries.

use crate::error::RepositoryError;
use crate::row::{EVENT_COLUMNS, claimed_event_from_row, event_from_row};
use outboxd_core::event::{EventStatus, OutboxEvent};
use sqlx::postgres::PgConnection;
use sqlx::{Connection, Postgres, Row, Transaction};
use std::time::Duration;

/// Timeout for the `SELECT 1` health probe.
const PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Reconnection backoff: first delay, cap, and attempt bound.
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Upper bound on a single dead-event page.
const MAX_DEAD_PAGE: i64 = 1000;

/// Connection settings for a [`Repository`] instance.
#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// `PostgreSQL` connection string.
    pub dsn: String,
    /// How long a connect attempt may take.
    pub connect_timeout: Duration,
    /// Session statement timeout, re-applied after every (re)connect so no
    /// query can hang a worker indefinitely.
    pub statement_timeout: Duration,
}

impl RepositoryConfig {
    /// Worker-mode settings: 10 s connect, 30 s statement timeout.
    #[must_use]
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            connect_timeout: Duration::from_secs(10),
            statement_timeout: Duration::from_secs(30),
        }
    }

    /// Observability-mode settings: 2 s connect, 5 s statement timeout.
    ///
    /// Observability callers construct a fresh short-lived instance per
    /// request and must never share a worker's connection.
    #[must_use]
    pub fn observer(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            connect_timeout: Duration::from_secs(2),
            statement_timeout: Duration::from_secs(5),
        }
    }

    /// Override the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the statement timeout.
    #[must_use]
    pub const fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = timeout;
        self
    }
}

/// Data-access boundary for the `outbox_event` table.
///
/// Owns one connection. Worker instances keep theirs for the process
/// lifetime; observability callers make short-lived ones. All mutations
/// commit within their own transaction unless they run inside a [`Claim`].
pub struct Repository {
    conn: PgConnection,
    config: RepositoryConfig,
}

impl Repository {
    /// Connect and apply the session statement timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::ConnectTimeout`] if the dial exceeds the
    /// configured bound, or [`RepositoryError::Connection`] on failure.
    pub async fn connect(config: RepositoryConfig) -> Result<Self, RepositoryError> {
        let conn = Box::pin(Self::dial(&config)).await?;
        Ok(Self { conn, config })
    }

    async fn dial(config: &RepositoryConfig) -> Result<PgConnection, RepositoryError> {
        let mut conn = tokio::time::timeout(
            config.connect_timeout,
            PgConnection::connect(&config.dsn),
        )
        .await
        .map_err(|_| RepositoryError::ConnectTimeout(config.connect_timeout))?
        .map_err(RepositoryError::Connection)?;

        // SET does not take bind parameters; the value is a config integer.
        let millis = config.statement_timeout.as_millis();
        sqlx::query(&format!("SET statement_timeout = {millis}"))
            .execute(&mut conn)
            .await
            .map_err(RepositoryError::Query)?;

        Ok(conn)
    }

    /// Whether a trivial round-trip currently succeeds.
    pub async fn is_connected(&mut self) -> bool {
        self.ping().await.is_ok()
    }

    async fn ping(&mut self) -> Result<(), RepositoryError> {
        tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(&mut self.conn))
            .await
            .map_err(|_| RepositoryError::ConnectTimeout(PING_TIMEOUT))?
            .map_err(RepositoryError::Query)?;
        Ok(())
    }

    /// Verify the connection, re-dialing with bounded exponential backoff if
    /// the ping fails. A successful re-dial re-applies the session statement
    /// timeout. Called before each worker-driven operation.
    ///
    /// # Errors
    ///
    /// Returns the last dial error once the attempt bound is exhausted; the
    /// caller sleeps a poll interval and tries again next iteration.
    pub async fn ensure_connected(&mut self) -> Result<(), RepositoryError> {
        if self.ping().await.is_ok() {
            return Ok(());
        }

        tracing::warn!("database ping failed, reconnecting");
        let mut delay = RECONNECT_INITIAL_DELAY;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::dial(&self.config).await {
                Ok(conn) => {
                    self.conn = conn;
                    metrics::counter!("outbox.repository.reconnects").increment(1);
                    tracing::info!(attempt, "database connection re-established");
                    return Ok(());
                }
                Err(e) if attempt >= RECONNECT_MAX_ATTEMPTS => {
                    tracing::error!(attempt, error = %e, "reconnect failed after max attempts");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis(),
                        error = %e,
                        "reconnect failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    }

    /// Atomically claim up to `batch_size` due rows.
    ///
    /// Due rows (`status IN ('pending','retry')`, `next_run_at <= now()`)
    /// are selected in `id` order and row-locked with `FOR UPDATE SKIP
    /// LOCKED`: rows locked by another worker are skipped without blocking,
    /// so no two workers observe the same row claimed concurrently.
    ///
    /// The locks live as long as the returned [`Claim`]'s transaction. The
    /// caller mutates each row's outcome through the claim and then commits;
    /// dropping the claim rolls back and releases the locks with the rows
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] on connection loss or statement
    /// failure, or [`RepositoryError::SchemaAnomaly`] if a claimed row
    /// cannot be decoded (rows with no usable `id` or an unknown status are
    /// skipped with a warning instead).
    pub async fn claim(&mut self, batch_size: u32) -> Result<Claim<'_>, RepositoryError> {
        let mut tx = self.conn.begin().await.map_err(RepositoryError::Query)?;

        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_event \
             WHERE status IN ('pending', 'retry') AND next_run_at <= now() \
             ORDER BY id ASC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(batch_size))
            .fetch_all(&mut *tx)
            .await
            .map_err(RepositoryError::Query)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(event) = claimed_event_from_row(row)? {
                events.push(event);
            }
        }

        metrics::counter!("outbox.events.claimed").increment(events.len() as u64);
        Ok(Claim { tx, events })
    }

    /// Mark one row `done` in its own transaction.
    ///
    /// Prefer [`Claim::mark_success`], which keeps the row lock held from
    /// claim to outcome. Returns whether a claimable row actually changed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn mark_success(&mut self, event_id: i64) -> Result<bool, RepositoryError> {
        mark_success_on(&mut self.conn, event_id).await
    }

    /// Mark one row `retry` or `dead` in its own transaction.
    ///
    /// See [`Claim::mark_retry_or_dead`] for the decision rules.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn mark_retry_or_dead(
        &mut self,
        event_id: i64,
        current_attempts: i32,
        backoff: Duration,
        max_attempts: i32,
    ) -> Result<Option<EventStatus>, RepositoryError> {
        mark_retry_or_dead_on(&mut self.conn, event_id, current_attempts, backoff, max_attempts)
            .await
    }

    /// Paginated read of dead rows, optional filters applied server-side.
    ///
    /// `limit` is clamped to 0..=1000 and `offset` to >= 0.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the query fails, or
    /// [`RepositoryError::SchemaAnomaly`] if a row cannot be decoded.
    pub async fn fetch_dead_events(
        &mut self,
        limit: i64,
        offset: i64,
        aggregate_type: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<Vec<OutboxEvent>, RepositoryError> {
        let (limit, offset) = clamp_page(limit, offset);
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_event \
             WHERE status = 'dead' \
               AND ($1::text IS NULL OR aggregate_type = $1) \
               AND ($2::text IS NULL OR event_type = $2) \
             ORDER BY id ASC \
             LIMIT $3 OFFSET $4"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_type)
            .bind(event_type)
            .bind(limit)
            .bind(offset)
            .fetch_all(&mut self.conn)
            .await
            .map_err(RepositoryError::Query)?;

        rows.iter().map(event_from_row).collect()
    }

    /// Count dead rows matching the filters.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the query fails.
    pub async fn count_dead_events(
        &mut self,
        aggregate_type: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<i64, RepositoryError> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM outbox_event \
             WHERE status = 'dead' \
               AND ($1::text IS NULL OR aggregate_type = $1) \
               AND ($2::text IS NULL OR event_type = $2)",
        )
        .bind(aggregate_type)
        .bind(event_type)
        .fetch_one(&mut self.conn)
        .await
        .map_err(RepositoryError::Query)
    }

    /// Fetch one dead row by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the query fails, or
    /// [`RepositoryError::SchemaAnomaly`] if the row cannot be decoded.
    pub async fn get_dead_event(
        &mut self,
        event_id: i64,
    ) -> Result<Option<OutboxEvent>, RepositoryError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM outbox_event WHERE id = $1 AND status = 'dead'"
        );
        let row = sqlx::query(&sql)
            .bind(event_id)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(RepositoryError::Query)?;

        row.as_ref().map(event_from_row).transpose()
    }

    /// Reset one dead row to `pending` with `attempts = 0` and
    /// `next_run_at = now()`, so the next worker cycle picks it up.
    ///
    /// The `status = 'dead'` guard is part of the `UPDATE`, so races with a
    /// concurrent dispatch are serialized by the store. Returns whether
    /// exactly one row changed.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn reset_dead_to_pending(&mut self, event_id: i64) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE outbox_event \
             SET status = 'pending', attempts = 0, next_run_at = now() \
             WHERE id = $1 AND status = 'dead'",
        )
        .bind(event_id)
        .execute(&mut self.conn)
        .await
        .map_err(RepositoryError::Query)?;

        let reset = result.rows_affected() == 1;
        if reset {
            tracing::info!(event_id, "dead event reset to pending");
            metrics::counter!("outbox.dlq.reset").increment(1);
        }
        Ok(reset)
    }

    /// Reset many dead rows to `pending`; non-dead ids are silently ignored.
    /// Returns the count actually transitioned.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn reset_dead_to_pending_batch(
        &mut self,
        event_ids: &[i64],
    ) -> Result<u64, RepositoryError> {
        if event_ids.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(
            "UPDATE outbox_event \
             SET status = 'pending', attempts = 0, next_run_at = now() \
             WHERE id = ANY($1) AND status = 'dead'",
        )
        .bind(event_ids)
        .execute(&mut self.conn)
        .await
        .map_err(RepositoryError::Query)?;

        let reset = result.rows_affected();
        tracing::info!(requested = event_ids.len(), reset, "dead events reset to pending");
        metrics::counter!("outbox.dlq.reset").increment(reset);
        Ok(reset)
    }
}

/// An open claim transaction holding row locks on a batch of due events.
///
/// The locks persist from claim until [`commit`](Self::commit): no other
/// worker can touch these rows meanwhile, and a crash aborts the transaction
/// so another worker re-picks the rows without double-commit.
pub struct Claim<'c> {
    tx: Transaction<'c, Postgres>,
    events: Vec<OutboxEvent>,
}

impl Claim<'_> {
    /// The claimed events, in `id` order.
    #[must_use]
    pub fn events(&self) -> &[OutboxEvent] {
        &self.events
    }

    /// Whether the claim selected no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of claimed rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Mark one claimed row `done`, incrementing `attempts` by 1.
    ///
    /// Returns whether a claimable row actually changed; `false` indicates
    /// the row was not in `pending`/`retry`, which the caller logs as an
    /// anomaly.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn mark_success(&mut self, event_id: i64) -> Result<bool, RepositoryError> {
        mark_success_on(&mut *self.tx, event_id).await
    }

    /// Mark one claimed row `retry` or `dead`.
    ///
    /// The decision is evaluated by the store inside a single `UPDATE`:
    ///
    /// - `current_attempts + 1 >= max_attempts` → `dead`, `next_run_at`
    ///   unchanged
    /// - otherwise → `retry`, `next_run_at = now() + backoff`
    ///
    /// Both branches set `attempts = current_attempts + 1`, where
    /// `current_attempts` is the value read at claim time, so no lost update
    /// is possible while the claim transaction holds the row lock, and
    /// races with DLQ resets are store-serialized.
    ///
    /// Returns the state the store chose, or `None` if the row was no
    /// longer claimable.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the update fails.
    pub async fn mark_retry_or_dead(
        &mut self,
        event_id: i64,
        current_attempts: i32,
        backoff: Duration,
        max_attempts: i32,
    ) -> Result<Option<EventStatus>, RepositoryError> {
        mark_retry_or_dead_on(&mut *self.tx, event_id, current_attempts, backoff, max_attempts)
            .await
    }

    /// Commit the claim transaction, persisting all outcomes and releasing
    /// the row locks.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the commit fails; the
    /// transaction is rolled back by the store and the rows stay claimable.
    pub async fn commit(self) -> Result<(), RepositoryError> {
        self.tx.commit().await.map_err(RepositoryError::Query)
    }

    /// Roll back explicitly, releasing the locks with the rows unchanged.
    ///
    /// Dropping the claim has the same effect; this form surfaces errors.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Query`] if the rollback fails.
    pub async fn rollback(self) -> Result<(), RepositoryError> {
        self.tx.rollback().await.map_err(RepositoryError::Query)
    }
}

async fn mark_success_on<'e, E>(executor: E, event_id: i64) -> Result<bool, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let result = sqlx::query(
        "UPDATE outbox_event \
         SET status = 'done', attempts = attempts + 1 \
         WHERE id = $1 AND status IN ('pending', 'retry')",
    )
    .bind(event_id)
    .execute(executor)
    .await
    .map_err(RepositoryError::Query)?;

    Ok(result.rows_affected() == 1)
}

async fn mark_retry_or_dead_on<'e, E>(
    executor: E,
    event_id: i64,
    current_attempts: i32,
    backoff: Duration,
    max_attempts: i32,
) -> Result<Option<EventStatus>, RepositoryError>
where
    E: sqlx::PgExecutor<'e>,
{
    let row = sqlx::query(
        "UPDATE outbox_event \
         SET status = CASE WHEN $2 + 1 >= $3 THEN 'dead' ELSE 'retry' END, \
             attempts = $2 + 1, \
             next_run_at = CASE WHEN $2 + 1 >= $3 THEN next_run_at \
                                ELSE now() + make_interval(secs => $4) END \
         WHERE id = $1 AND status IN ('pending', 'retry') \
         RETURNING status",
    )
    .bind(event_id)
    .bind(current_attempts)
    .bind(max_attempts)
    .bind(backoff.as_secs_f64())
    .fetch_optional(executor)
    .await
    .map_err(RepositoryError::Query)?;

    let Some(row) = row else {
        return Ok(None);
    };
    let status: String = row.try_get("status").map_err(RepositoryError::Query)?;
    let status = EventStatus::parse(&status)
        .map_err(|e| RepositoryError::SchemaAnomaly(format!("row {event_id}: {e}")))?;
    Ok(Some(status))
}

const fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    let limit = if limit < 0 {
        0
    } else if limit > MAX_DEAD_PAGE {
        MAX_DEAD_PAGE
    } else {
        limit
    };
    let offset = if offset < 0 { 0 } else { offset };
    (limit, offset)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;

    #[test]
    fn page_arguments_clamp() {
        assert_eq!(clamp_page(50, 10), (50, 10));
        assert_eq!(clamp_page(5000, 0), (1000, 0));
        assert_eq!(clamp_page(-1, -20), (0, 0));
        assert_eq!(clamp_page(1000, 0), (1000, 0));
    }

    #[test]
    fn worker_config_defaults() {
        let config = RepositoryConfig::new("postgres://localhost/outbox");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.statement_timeout, Duration::from_secs(30));
    }

    #[test]
    fn observer_config_tightens_timeouts() {
        let config = RepositoryConfig::observer("postgres://localhost/outbox");
        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.statement_timeout, Duration::from_secs(5));
    }

    #[test]
    fn config_overrides_apply() {
        let config = RepositoryConfig::new("postgres://localhost/outbox")
            .with_connect_timeout(Duration::from_secs(1))
            .with_statement_timeout(Duration::from_secs(3));
        assert_eq!(config.connect_timeout, Duration::from_secs(1));
        assert_eq!(config.statement_timeout, Duration::from_secs(3));
    }
}
