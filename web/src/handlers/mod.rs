//! HTTP handlers for the observability surface.

pub mod dead_events;
pub mod health;
