//! Health endpoints for K8s probes.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Health status of the dispatch service.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub broker_connected: bool,
    pub dispatching: bool,
}

/// Shared health state.
#[derive(Clone)]
pub struct HealthState {
    inner: Arc<RwLock<HealthStateInner>>,
}

struct HealthStateInner {
    broker_connected: bool,
    dispatching: bool,
    last_error: Option<String>,
}

impl HealthState {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HealthStateInner {
                broker_connected: false,
                dispatching: false,
                last_error: None,
            })),
        }
    }

    pub async fn set_broker_connected(&self, connected: bool) {
        let mut inner = self.inner.write().await;
        inner.broker_connected = connected;
    }

    pub async fn set_dispatching(&self, dispatching: bool) {
        let mut inner = self.inner.write().await;
        inner.dispatching = dispatching;
    }

    pub async fn set_error(&self, error: Option<String>) {
        let mut inner = self.inner.write().await;
        inner.last_error = error;
    }

    /// Check if alive (for liveness).
    ///
    /// Only checks the dispatcher, not the broker connection. A transient
    /// NATS disconnection should not trigger a pod restart.
    pub async fn is_alive(&self) -> bool {
        let inner = self.inner.read().await;
        inner.dispatching
    }

    /// Check if ready (for readiness).
    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.read().await;
        inner.broker_connected && inner.dispatching
    }

    pub async fn status(&self) -> HealthStatus {
        let inner = self.inner.read().await;
        let status = if inner.broker_connected && inner.dispatching {
            "healthy".to_string()
        } else {
            let reason = inner
                .last_error
                .clone()
                .unwrap_or_else(|| "not dispatching".to_string());
            format!("unhealthy: {}", reason)
        };
        HealthStatus {
            status,
            broker_connected: inner.broker_connected,
            dispatching: inner.dispatching,
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Health server for K8s probes.
pub struct HealthServer {
    port: u16,
    state: HealthState,
    metrics_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl HealthServer {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            state: HealthState::new(),
            metrics_handle: None,
        }
    }

    /// Set the metrics handle for the /metrics endpoint.
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Get the health state for updates.
    pub fn state(&self) -> HealthState {
        self.state.clone()
    }

    /// Build the router.
    pub fn router(&self) -> Router {
        let state = self.state.clone();
        let metrics_handle = self.metrics_handle.clone();

        let mut router = Router::new()
            .route("/health", get(health_handler))
            .route("/healthz", get(health_handler))
            .route("/ready", get(ready_handler))
            .route("/readyz", get(ready_handler))
            .with_state(state);

        if let Some(handle) = metrics_handle {
            router = router.route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            );
        }

        router
    }

    /// Run the health server.
    pub async fn run(self) -> Result<(), std::io::Error> {
        let router = self.router();
        let addr = format!("0.0.0.0:{}", self.port);

        info!(addr = %addr, "Starting health server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

/// Liveness probe handler.
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let status = state.status().await;
    if state.is_alive().await {
        (StatusCode::OK, Json(status))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(status))
    }
}

/// Readiness probe handler.
async fn ready_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if state.is_ready().await {
        (StatusCode::OK, Json(state.status().await))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(state.status().await))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_health_state_transitions() {
        let state = HealthState::new();
        assert!(!state.is_alive().await);
        assert!(!state.is_ready().await);

        state.set_dispatching(true).await;
        assert!(state.is_alive().await);
        // Not ready until the broker is connected too
        assert!(!state.is_ready().await);

        state.set_broker_connected(true).await;
        assert!(state.is_ready().await);
        assert_eq!(state.status().await.status, "healthy");
    }

    #[tokio::test]
    async fn test_liveness_survives_broker_disconnect() {
        let state = HealthState::new();
        state.set_dispatching(true).await;
        state.set_broker_connected(true).await;

        state.set_broker_connected(false).await;
        assert!(state.is_alive().await);
        assert!(!state.is_ready().await);
    }

    #[tokio::test]
    async fn test_status_reports_last_error() {
        let state = HealthState::new();
        state.set_error(Some("connect refused".to_string())).await;
        let status = state.status().await;
        assert!(status.status.contains("connect refused"));
        assert!(!status.broker_connected);
    }
}
