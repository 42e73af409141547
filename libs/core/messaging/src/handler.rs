//! Handler traits and worker identity.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use uuid::Uuid;

use crate::error::HandlerError;
use crate::message::Message;
use crate::validator::ValidationResult;

/// Stable identity of one worker slot, exposed to handlers for logging and
/// correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId {
    index: usize,
    id: Uuid,
}

impl WorkerId {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            id: Uuid::new_v4(),
        }
    }

    /// Slot index within the subscription's pool (0-based).
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}-{}", self.index, self.id)
    }
}

/// Message handler.
///
/// Acknowledgement is the handler's job (push model, at-least-once): call
/// `message.ack()`, `nak`, or `term` before returning. A message left
/// unacknowledged is redelivered by the broker after its ack deadline.
///
/// # Error Handling
///
/// Return a `HandlerError` with the appropriate category:
/// - `Transient`: message is nak'd with exponential backoff
/// - `Permanent`: message is terminated (no redelivery)
/// - `RateLimited`: message is nak'd with longer delays
///
/// # Example
///
/// ```rust,ignore
/// struct CommentHandler {
///     store: Arc<CommentStore>,
/// }
///
/// #[async_trait]
/// impl Handler for CommentHandler {
///     async fn handle(&self, message: Message, worker: WorkerId) -> Result<(), HandlerError> {
///         let comment: Comment = message.json()?;
///         self.store.insert(comment).await
///             .map_err(|e| HandlerError::transient_with_source("store insert failed", e))?;
///         message.ack().await
///             .map_err(|e| HandlerError::transient_with_source("ack failed", e))?;
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "comment_handler"
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one message.
    async fn handle(&self, message: Message, worker: WorkerId) -> Result<(), HandlerError>;

    /// Get the handler name.
    ///
    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// Callback invoked instead of the handler when a payload fails validation.
///
/// The message is nak'd afterwards unless the callback marks it handled by
/// ack'ing or terminating it.
#[async_trait]
pub trait ValidationErrorHook: Send + Sync {
    async fn on_validation_error(&self, message: Message, result: &ValidationResult);
}

struct FnHandler<F> {
    name: &'static str,
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(Message, WorkerId) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync,
{
    async fn handle(&self, message: Message, worker: WorkerId) -> Result<(), HandlerError> {
        (self.f)(message, worker).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// Wrap an async closure as a [`Handler`].
///
/// ```rust,ignore
/// let handler = handler_fn("print_msg", |message, worker| async move {
///     info!(subject = message.subject(), %worker, "got message");
///     message.ack().await.map_err(|e| HandlerError::transient(e.to_string()))?;
///     Ok(())
/// });
/// ```
pub fn handler_fn<F, Fut>(name: &'static str, f: F) -> Arc<dyn Handler>
where
    F: Fn(Message, WorkerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name,
        f: move |message, worker| f(message, worker).boxed(),
    })
}

/// A handler that does nothing and leaves the message unacknowledged
/// (for testing redelivery behavior).
#[derive(Debug, Clone, Default)]
pub struct NoOpHandler;

#[async_trait]
impl Handler for NoOpHandler {
    async fn handle(&self, _message: Message, _worker: WorkerId) -> Result<(), HandlerError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "noop_handler"
    }
}

/// A handler that acknowledges every message (for testing).
#[derive(Debug, Clone, Default)]
pub struct AckHandler;

#[async_trait]
impl Handler for AckHandler {
    async fn handle(&self, message: Message, _worker: WorkerId) -> Result<(), HandlerError> {
        message
            .ack()
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "ack_handler"
    }
}

/// A handler that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingHandler {
    error_message: String,
    transient: bool,
}

impl FailingHandler {
    /// Create a handler that fails with transient errors.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            transient: true,
        }
    }

    /// Create a handler that fails with permanent errors.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            error_message: message.into(),
            transient: false,
        }
    }
}

#[async_trait]
impl Handler for FailingHandler {
    async fn handle(&self, _message: Message, _worker: WorkerId) -> Result<(), HandlerError> {
        if self.transient {
            Err(HandlerError::transient(&self.error_message))
        } else {
            Err(HandlerError::permanent(&self.error_message))
        }
    }

    fn name(&self) -> &'static str {
        "failing_handler"
    }
}
