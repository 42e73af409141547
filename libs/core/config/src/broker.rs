use crate::{env_or_default, env_parse, ConfigError, FromEnv};

/// Connection settings for the NATS broker.
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    /// Client name reported to the broker
    pub service_name: String,
    pub host: String,
    pub port: u16,
    /// Subscribe through JetStream (durable, acknowledgement-based) instead
    /// of plain core NATS subscriptions
    pub enable_jetstream: bool,
}

impl BrokerSettings {
    pub fn new(service_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            service_name: service_name.into(),
            host: host.into(),
            port,
            enable_jetstream: false,
        }
    }

    /// Get the broker URL as "nats://host:port"
    pub fn url(&self) -> String {
        format!("nats://{}:{}", self.host, self.port)
    }
}

impl FromEnv for BrokerSettings {
    /// Reads from environment variables with sensible defaults:
    /// - SERVICE_NAME: defaults to "dispatch"
    /// - NATS_HOST: defaults to "127.0.0.1"
    /// - NATS_PORT: defaults to 4222
    /// - NATS_ENABLE_JETSTREAM: defaults to false
    fn from_env() -> Result<Self, ConfigError> {
        let service_name = env_or_default("SERVICE_NAME", "dispatch");
        let host = env_or_default("NATS_HOST", "127.0.0.1");
        let port = env_parse("NATS_PORT", 4222)?;
        let enable_jetstream = env_parse("NATS_ENABLE_JETSTREAM", false)?;

        Ok(Self {
            service_name,
            host,
            port,
            enable_jetstream,
        })
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            service_name: "dispatch".to_string(),
            host: "127.0.0.1".to_string(),
            port: 4222,
            enable_jetstream: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_settings_from_env_with_defaults() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", None::<&str>),
                ("NATS_HOST", None),
                ("NATS_PORT", None),
                ("NATS_ENABLE_JETSTREAM", None),
            ],
            || {
                let settings = BrokerSettings::from_env().unwrap();
                assert_eq!(settings.service_name, "dispatch");
                assert_eq!(settings.host, "127.0.0.1");
                assert_eq!(settings.port, 4222);
                assert!(!settings.enable_jetstream);
                assert_eq!(settings.url(), "nats://127.0.0.1:4222");
            },
        );
    }

    #[test]
    fn test_broker_settings_from_env_with_custom_values() {
        temp_env::with_vars(
            [
                ("SERVICE_NAME", Some("js_listen_push")),
                ("NATS_HOST", Some("nats.internal")),
                ("NATS_PORT", Some("4333")),
                ("NATS_ENABLE_JETSTREAM", Some("true")),
            ],
            || {
                let settings = BrokerSettings::from_env().unwrap();
                assert_eq!(settings.service_name, "js_listen_push");
                assert_eq!(settings.host, "nats.internal");
                assert_eq!(settings.port, 4333);
                assert!(settings.enable_jetstream);
                assert_eq!(settings.url(), "nats://nats.internal:4333");
            },
        );
    }

    #[test]
    fn test_broker_settings_from_env_invalid_port() {
        temp_env::with_var("NATS_PORT", Some("not_a_number"), || {
            let result = BrokerSettings::from_env();
            assert!(result.is_err());
            assert!(result.unwrap_err().to_string().contains("NATS_PORT"));
        });
    }

    #[test]
    fn test_broker_settings_url() {
        let settings = BrokerSettings::new("worker", "localhost", 4222);
        assert_eq!(settings.url(), "nats://localhost:4222");
        assert!(!settings.enable_jetstream);
    }
}
