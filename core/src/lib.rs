//! Core types for the outboxd transactional-outbox dispatcher.
//!
//! Producers write business mutations and outbox rows in a single database
//! transaction; the dispatcher drains those rows asynchronously and invokes a
//! type-specific handler per row, guaranteeing at-least-once delivery.
//!
//! This crate holds the value types shared by every other outboxd crate:
//!
//! - [`event`]: the outbox row model and its status state machine
//! - [`registry`]: the mapping from event type to handler
//! - [`config`]: dispatcher tuning parameters and their validation
//!
//! The crate is deliberately free of I/O: the database boundary lives in
//! `outboxd-postgres` and the dispatch loop in `outboxd-worker`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod event;
pub mod registry;

pub use config::{ConfigError, DispatcherConfig};
pub use event::{EventStatus, InvalidStatus, OutboxEvent};
pub use registry::{EventHandler, HandlerError, HandlerRegistry};
