//! Prometheus metrics for the dispatcher.

use metrics::{counter, histogram};
use std::time::Duration;

/// Metrics for dispatch and handler execution.
#[derive(Clone)]
pub struct DispatchMetrics {
    service: String,
}

impl DispatchMetrics {
    /// Create new metrics labelled with the service name.
    pub fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
        }
    }

    /// Record a message dequeued by a worker slot.
    pub fn message_received(&self, pattern: &str, handler: &str) {
        counter!(
            "dispatch_messages_received_total",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string()
        )
        .increment(1);
    }

    /// Record a message handled successfully.
    pub fn message_handled(&self, pattern: &str, handler: &str, duration: Duration) {
        counter!(
            "dispatch_messages_handled_total",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string()
        )
        .increment(1);

        histogram!(
            "dispatch_handler_duration_seconds",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a payload that failed validation.
    pub fn validation_failed(&self, pattern: &str, handler: &str) {
        counter!(
            "dispatch_validation_failures_total",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string()
        )
        .increment(1);
    }

    /// Record a handler error.
    pub fn handler_failed(&self, pattern: &str, handler: &str, category: &str) {
        counter!(
            "dispatch_handler_failures_total",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    /// Record a handler panic.
    pub fn handler_panicked(&self, pattern: &str, handler: &str) {
        counter!(
            "dispatch_handler_panics_total",
            "service" => self.service.clone(),
            "pattern" => pattern.to_string(),
            "handler" => handler.to_string()
        )
        .increment(1);
    }

    /// Record an inbound subject no subscription matched.
    pub fn unmatched_subject(&self) {
        counter!(
            "dispatch_unmatched_subjects_total",
            "service" => self.service.clone()
        )
        .increment(1);
    }
}

/// Initialize Prometheus metrics.
pub fn init_metrics() -> metrics_exporter_prometheus::PrometheusHandle {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    builder
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}
