//! Dispatch loop and supervisor for the outboxd dispatcher.
//!
//! A [`Worker`] is one independent dispatch instance: it owns one database
//! connection (through a repository), a bounded pool of handler executions
//! and a stop signal. The [`Supervisor`] spawns N workers, installs signal
//! handlers, propagates shutdown and restarts workers that die abnormally.
//!
//! # Per-iteration flow
//!
//! 1. Check the stop signal.
//! 2. `ensure_connected`: reconnect with backoff if the ping fails.
//! 3. Claim a batch of due rows; the claim transaction holds their locks.
//! 4. Run handlers concurrently, bounded by `max_parallel`.
//! 5. Record per-row outcomes inside the claim transaction.
//! 6. Commit, releasing the locks.
//!
//! Because the locks persist from claim to commit, a worker crash aborts
//! the transaction and other workers re-pick the rows with their state
//! unchanged: at-least-once delivery without double-commit.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod supervisor;
mod worker;

pub use supervisor::Supervisor;
pub use worker::{Worker, WorkerConfig};
