//! Shared state for the observability handlers.

use crate::error::AppError;
use metrics_exporter_prometheus::PrometheusHandle;
use outboxd_postgres::{Repository, RepositoryConfig};

/// State shared across all observability handlers.
///
/// Carries the observer-mode repository settings (tight timeouts) and the
/// optional Prometheus render handle. Handlers build a fresh [`Repository`]
/// per request from these settings; the surface holds no connection of its
/// own.
#[derive(Clone)]
pub struct AppState {
    repository: RepositoryConfig,
    metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// State for the given DSN, with observer-mode timeouts and no metrics.
    #[must_use]
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            repository: RepositoryConfig::observer(dsn),
            metrics: None,
        }
    }

    /// Attach the Prometheus render handle, enabling `/metrics`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Open a short-lived repository for the current request.
    pub(crate) async fn repository(&self) -> Result<Repository, AppError> {
        Ok(Repository::connect(self.repository.clone()).await?)
    }

    pub(crate) const fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.metrics.as_ref()
    }
}
