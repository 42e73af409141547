//! Error types for the NATS dispatcher.

use messaging::ConfigError;
use thiserror::Error;

/// Error that can occur in dispatcher operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// NATS connection error (fatal at startup; reconnects after startup are
    /// handled inside the client)
    #[error("NATS connection error: {0}")]
    Connection(#[from] async_nats::ConnectError),

    /// Subscribing a subject pattern failed
    #[error("subscribe error on '{subject}': {reason}")]
    Subscribe { subject: String, reason: String },

    /// JetStream error
    #[error("JetStream error: {0}")]
    JetStream(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl DispatchError {
    /// Create a JetStream error from an async_nats error.
    pub fn from_jetstream_error(error: impl std::fmt::Display) -> Self {
        Self::JetStream(error.to_string())
    }

    /// Create a subscribe error.
    pub fn subscribe_error(subject: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Subscribe {
            subject: subject.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use messaging::PatternError;

    #[test]
    fn test_subscribe_error_format() {
        let err = DispatchError::subscribe_error("test.*.stream", "no responders");
        assert!(err.to_string().contains("test.*.stream"));
        assert!(err.to_string().contains("no responders"));
    }

    #[test]
    fn test_config_error_conversion() {
        let err: DispatchError = ConfigError::Pattern(PatternError::Empty).into();
        assert!(matches!(err, DispatchError::Config(_)));
    }
}
