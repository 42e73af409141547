//! Error types for subscription registration and message handling.

use std::fmt;
use thiserror::Error;

use crate::subject::PatternError;

/// Error raised when building or registering a subscription.
///
/// Configuration errors are fatal at startup: a service with a bad
/// subscription definition should not come up at all.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Subject pattern failed to parse (empty, bad wildcard placement, ...)
    #[error("invalid subject pattern: {0}")]
    Pattern(#[from] PatternError),

    /// Worker count below 1
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// Queue capacity below 1
    #[error("queue capacity must be at least 1")]
    ZeroQueueCapacity,
}

/// Error categories determine redelivery behavior.
///
/// # Categories
///
/// - **Transient**: temporary failure, nak with 1-30s exponential backoff
/// - **Permanent**: unrecoverable, terminate the message (no redelivery)
/// - **RateLimited**: upstream rate limited, nak with longer delays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Temporary failure (network timeout, service unavailable)
    Transient,

    /// Permanent failure (invalid data, business rule violation)
    Permanent,

    /// Rate limited by an upstream service
    RateLimited,
}

impl ErrorCategory {
    /// Get the base backoff delay in milliseconds.
    pub fn base_backoff_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 1000,   // 1s
            ErrorCategory::Permanent => 0,      // No redelivery
            ErrorCategory::RateLimited => 5000, // 5s
        }
    }

    /// Get the maximum backoff delay in milliseconds.
    pub fn max_backoff_ms(&self) -> u64 {
        match self {
            ErrorCategory::Transient => 30_000,    // 30s
            ErrorCategory::Permanent => 0,         // No redelivery
            ErrorCategory::RateLimited => 120_000, // 2 min
        }
    }

    /// Calculate backoff delay for a given redelivery attempt.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        if *self == ErrorCategory::Permanent {
            return 0;
        }

        let base = self.base_backoff_ms();
        let max = self.max_backoff_ms();
        let delay = base * 2u64.saturating_pow(attempt);
        delay.min(max)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Transient => write!(f, "transient"),
            ErrorCategory::Permanent => write!(f, "permanent"),
            ErrorCategory::RateLimited => write!(f, "rate_limited"),
        }
    }
}

/// Error returned by a message handler.
///
/// The category decides what happens to the unacknowledged message:
/// transient and rate-limited errors nak it with a backoff delay, permanent
/// errors terminate it so the broker stops redelivering a poison message.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Transient error (network timeout, temporary unavailability)
    #[error("transient error: {message}")]
    Transient {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Permanent error (invalid data, business logic failure)
    #[error("permanent error: {message}")]
    Permanent {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Rate limited by an upstream service
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// Payload decoding failed inside the handler
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Custom error with an explicit category
    #[error("{message}")]
    Custom {
        category: ErrorCategory,
        message: String,
    },
}

impl HandlerError {
    /// Create a transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            source: None,
        }
    }

    /// Create a transient error with a source.
    pub fn transient_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transient {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a permanent error.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
            source: None,
        }
    }

    /// Create a permanent error with a source.
    pub fn permanent_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Permanent {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a rate limited error.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Create a rate limited error with a retry-after hint.
    pub fn rate_limited_with_retry(message: impl Into<String>, retry_after_ms: u64) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// Get the error category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            HandlerError::Transient { .. } => ErrorCategory::Transient,
            HandlerError::Permanent { .. } => ErrorCategory::Permanent,
            HandlerError::RateLimited { .. } => ErrorCategory::RateLimited,
            HandlerError::Serialization(_) => ErrorCategory::Permanent,
            HandlerError::Custom { category, .. } => *category,
        }
    }

    /// Calculate the nak backoff delay for a given redelivery attempt.
    ///
    /// Rate limited errors with an explicit retry-after hint use that hint.
    pub fn backoff_delay_ms(&self, attempt: u32) -> u64 {
        if let HandlerError::RateLimited {
            retry_after_ms: Some(ms),
            ..
        } = self
        {
            return *ms;
        }
        self.category().backoff_delay_ms(attempt)
    }
}
