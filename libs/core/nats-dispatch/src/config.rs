//! Configuration for the dispatch application.

use std::time::Duration;

use core_config::{broker::BrokerSettings, env_or_default, env_parse, ConfigError, FromEnv};

/// Application configuration.
///
/// Subscription-level knobs (worker count, queue capacity, validator) live on
/// the subscription builder; this covers the broker session and dispatcher
/// lifecycle.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Client name reported to the broker
    pub service_name: String,

    /// Broker host
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Subscribe through JetStream (durable, acknowledgement-based) instead
    /// of plain core NATS subscriptions
    pub enable_jetstream: bool,

    /// JetStream stream provisioned over the registered patterns
    pub stream_name: String,

    /// Maximum messages retained in an auto-provisioned stream
    pub max_stream_messages: i64,

    /// How long the broker waits for an ack before redelivering
    pub ack_wait: Duration,

    /// How long drain waits for in-flight handlers before abandoning them
    pub drain_timeout: Duration,

    /// Health server port
    pub health_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service_name: "dispatch".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4222,
            enable_jetstream: false,
            stream_name: "DISPATCH".to_string(),
            max_stream_messages: 100_000,
            ack_wait: Duration::from_secs(30),
            drain_timeout: Duration::from_secs(30),
            health_port: 8081,
        }
    }
}

impl AppConfig {
    /// Create a configuration for the given service name. The stream name
    /// defaults to the sanitized upper-case service name.
    pub fn new(service_name: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let stream_name = stream_name_for(&service_name);
        Self {
            service_name,
            stream_name,
            ..Default::default()
        }
    }

    /// Get the broker URL as "nats://host:port".
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }

    /// Set the broker host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the broker port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable or disable JetStream subscriptions.
    pub fn with_jetstream(mut self, enabled: bool) -> Self {
        self.enable_jetstream = enabled;
        self
    }

    /// Set the JetStream stream name.
    pub fn with_stream_name(mut self, name: impl Into<String>) -> Self {
        self.stream_name = name.into();
        self
    }

    /// Set the ack wait timeout.
    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    /// Set the drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the health server port.
    pub fn with_health_port(mut self, port: u16) -> Self {
        self.health_port = port;
        self
    }
}

impl FromEnv for AppConfig {
    /// Reads broker settings through [`BrokerSettings`] plus:
    /// - DISPATCH_STREAM: stream name (default: sanitized service name)
    /// - DISPATCH_DRAIN_TIMEOUT_SECS: defaults to 30
    /// - HEALTH_PORT: defaults to 8081
    fn from_env() -> Result<Self, ConfigError> {
        let broker = BrokerSettings::from_env()?;
        let stream_name = env_or_default("DISPATCH_STREAM", &stream_name_for(&broker.service_name));
        let drain_secs: u64 = env_parse("DISPATCH_DRAIN_TIMEOUT_SECS", 30)?;
        let health_port: u16 = env_parse("HEALTH_PORT", 8081)?;

        Ok(Self {
            service_name: broker.service_name,
            host: broker.host,
            port: broker.port,
            enable_jetstream: broker.enable_jetstream,
            stream_name,
            drain_timeout: Duration::from_secs(drain_secs),
            health_port,
            ..Default::default()
        })
    }
}

/// Derive a valid JetStream stream name from a service name: upper-case,
/// with everything outside `[A-Za-z0-9_-]` replaced by `_`.
fn stream_name_for(service_name: &str) -> String {
    service_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::new("js_listen_push");
        assert_eq!(config.service_name, "js_listen_push");
        assert_eq!(config.stream_name, "JS_LISTEN_PUSH");
        assert_eq!(config.url(), "nats://127.0.0.1:4222");
        assert!(!config.enable_jetstream);
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = AppConfig::new("listener")
            .with_host("nats.internal")
            .with_port(4333)
            .with_jetstream(true)
            .with_stream_name("COMMENTS")
            .with_drain_timeout(Duration::from_secs(5))
            .with_health_port(9090);

        assert_eq!(config.url(), "nats://nats.internal:4333");
        assert!(config.enable_jetstream);
        assert_eq!(config.stream_name, "COMMENTS");
        assert_eq!(config.drain_timeout, Duration::from_secs(5));
        assert_eq!(config.health_port, 9090);
    }

    #[test]
    fn test_stream_name_sanitization() {
        assert_eq!(stream_name_for("js.listen push"), "JS_LISTEN_PUSH");
        assert_eq!(stream_name_for("worker-1"), "WORKER-1");
    }
}
