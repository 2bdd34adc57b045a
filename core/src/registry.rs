//! Handler registry: the mapping from event type to handler.
//!
//! A handler is a function of the event payload alone. It knows nothing about
//! the row's status columns, and if it needs database access it must open its
//! own connection; the worker's connection is engine-owned.
//!
//! The registry is read-only after construction and is shared across worker
//! instances behind an `Arc`. Tests substitute closures for real handlers.
//!
//! # Example
//!
//! ```
//! use outboxd_core::registry::{HandlerError, HandlerRegistry};
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register("order.created", |payload| async move {
//!     payload["orderId"]
//!         .as_str()
//!         .ok_or_else(|| HandlerError::failed("payload missing orderId"))?;
//!     Ok(())
//! });
//!
//! assert!(registry.get("order.created").is_some());
//! assert!(registry.get("order.deleted").is_none());
//! ```

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Failure outcome of a single handler invocation.
///
/// Handler failures are captured per row and drive the retry/dead transition;
/// they never propagate to the worker loop.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// No handler is registered for the row's event type.
    ///
    /// Deterministic: the row flows through the normal retry/dead path
    /// instead of halting the worker.
    #[error("no handler registered for event type '{event_type}'")]
    NotFound {
        /// The event type that had no registered handler.
        event_type: String,
    },

    /// The handler signaled failure.
    #[error("handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Build a [`HandlerError::Failed`] from any displayable error.
    #[must_use]
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// A registered handler: an async function of the payload.
pub type EventHandler =
    Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Read-only mapping from `event_type` string to handler.
///
/// Constructed once at startup and passed to workers as a constructor
/// argument, so the dispatch loop has no global registry state and tests can
/// inject mocks.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, EventHandler>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type.
    ///
    /// Registering the same event type twice replaces the previous handler.
    pub fn register<F, Fut>(&mut self, event_type: impl Into<String>, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.handlers.insert(
            event_type.into(),
            Arc::new(move |payload| Box::pin(handler(payload))),
        );
    }

    /// Look up the handler for an event type.
    #[must_use]
    pub fn get(&self, event_type: &str) -> Option<&EventHandler> {
        self.handlers.get(event_type)
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the registry has no handlers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Iterate over the registered event types (arbitrary order).
    pub fn event_types(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("event_types", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn registered_handler_receives_payload() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = Arc::clone(&calls);

        let mut registry = HandlerRegistry::new();
        registry.register("order.created", move |payload| {
            let calls = Arc::clone(&calls_clone);
            async move {
                assert_eq!(payload["orderId"], "1001");
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let handler = registry.get("order.created").expect("handler registered");
        handler(serde_json::json!({"orderId": "1001"}))
            .await
            .expect("handler should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_failure_is_returned() {
        let mut registry = HandlerRegistry::new();
        registry.register("order.created", |_payload| async {
            Err(HandlerError::failed("downstream unavailable"))
        });

        let handler = registry.get("order.created").expect("handler registered");
        let err = handler(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("downstream unavailable"));
    }

    #[test]
    fn missing_handler_is_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("order.created").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn reregistering_replaces_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", |_| async { Ok(()) });
        registry.register("a", |_| async { Ok(()) });
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn not_found_error_names_the_event_type() {
        let err = HandlerError::NotFound {
            event_type: "order.created".to_string(),
        };
        assert!(err.to_string().contains("order.created"));
    }
}
