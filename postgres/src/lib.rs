//! `PostgreSQL` repository for the outboxd dispatcher.
//!
//! This crate owns every piece of SQL the engine runs. It provides:
//!
//! - Atomic claiming of due rows under concurrent workers (`FOR UPDATE SKIP
//!   LOCKED`, so workers never block each other and never observe the same
//!   row claimed twice)
//! - Per-row outcome mutations with the retry-vs-dead decision evaluated
//!   server-side in a single `UPDATE`
//! - Connection health checks and reconnection with bounded backoff
//! - Dead-event inspection and reset for the observability surface
//!
//! # Connection model
//!
//! A worker-mode [`Repository`] owns one long-lived connection; transactions
//! are explicit and each public operation is one transaction. Observability
//! callers construct short-lived instances via
//! [`RepositoryConfig::observer`], which tightens the connect and statement
//! timeouts; they must never share a worker's connection.
//!
//! # Example
//!
//! ```ignore
//! use outboxd_postgres::{Repository, RepositoryConfig};
//!
//! let mut repo = Repository::connect(RepositoryConfig::new(dsn)).await?;
//! let mut claim = repo.claim(10).await?;
//! for event in claim.events().to_vec() {
//!     // ... run the handler ...
//!     claim.mark_success(event.id).await?;
//! }
//! claim.commit().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod repository;
mod row;

pub use error::RepositoryError;
pub use repository::{Claim, Repository, RepositoryConfig};
