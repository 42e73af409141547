//! Subscription records and the pattern registry.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::debug;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::handler::{Handler, ValidationErrorHook};
use crate::subject::SubjectPattern;
use crate::validator::PayloadValidator;

/// Default worker slots per subscription.
pub const DEFAULT_WORKERS: usize = 1;

/// Default pending-message queue capacity per subscription.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unique identifier of a registered subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An immutable binding of a subject pattern to a handler.
///
/// Built through [`Subscription::builder`]; invalid input (bad pattern,
/// zero workers, zero queue capacity) fails the build with [`ConfigError`].
pub struct Subscription {
    id: SubscriptionId,
    pattern: SubjectPattern,
    handler: Arc<dyn Handler>,
    workers: usize,
    queue_capacity: usize,
    validator: Option<Arc<dyn PayloadValidator>>,
    validation_hook: Option<Arc<dyn ValidationErrorHook>>,
}

impl Subscription {
    /// Start building a subscription for the given pattern and handler.
    pub fn builder(
        pattern: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> SubscriptionBuilder {
        SubscriptionBuilder {
            pattern: pattern.into(),
            handler,
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            validator: None,
            validation_hook: None,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn pattern(&self) -> &SubjectPattern {
        &self.pattern
    }

    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    /// Maximum concurrent handler invocations for this subscription.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Capacity of the pending-message queue feeding the worker pool.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn validator(&self) -> Option<&Arc<dyn PayloadValidator>> {
        self.validator.as_ref()
    }

    pub fn validation_hook(&self) -> Option<&Arc<dyn ValidationErrorHook>> {
        self.validation_hook.as_ref()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pattern", &self.pattern.as_str())
            .field("handler", &self.handler.name())
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("validated", &self.validator.is_some())
            .finish()
    }
}

/// Builder for [`Subscription`].
pub struct SubscriptionBuilder {
    pattern: String,
    handler: Arc<dyn Handler>,
    workers: usize,
    queue_capacity: usize,
    validator: Option<Arc<dyn PayloadValidator>>,
    validation_hook: Option<Arc<dyn ValidationErrorHook>>,
}

impl SubscriptionBuilder {
    /// Set the worker count (concurrent handler invocations).
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the pending-message queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Attach a payload validator; invalid payloads never reach the handler.
    pub fn validator(mut self, validator: impl PayloadValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Attach a callback invoked when a payload fails validation.
    pub fn on_validation_error(mut self, hook: impl ValidationErrorHook + 'static) -> Self {
        self.validation_hook = Some(Arc::new(hook));
        self
    }

    /// Validate the definition and build the immutable subscription.
    pub fn build(self) -> Result<Subscription, ConfigError> {
        let pattern = SubjectPattern::parse(&self.pattern)?;
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }

        Ok(Subscription {
            id: SubscriptionId::new(),
            pattern,
            handler: self.handler,
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            validator: self.validator,
            validation_hook: self.validation_hook,
        })
    }
}

/// Registry mapping subject patterns to subscriptions.
///
/// Matching fans out: a subject is routed to *every* subscription whose
/// pattern matches it, in registration order.
#[derive(Default)]
pub struct SubscriptionRegistry {
    subscriptions: RwLock<Vec<Arc<Subscription>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription and return its id.
    pub fn register(&self, subscription: Subscription) -> SubscriptionId {
        let id = subscription.id();
        debug!(
            pattern = subscription.pattern().as_str(),
            handler = subscription.handler().name(),
            workers = subscription.workers(),
            %id,
            "Subscription registered"
        );
        self.subscriptions
            .write()
            .expect("subscription registry lock poisoned")
            .push(Arc::new(subscription));
        id
    }

    /// Remove a subscription. Returns false when the id is unknown.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self
            .subscriptions
            .write()
            .expect("subscription registry lock poisoned");
        let before = subscriptions.len();
        subscriptions.retain(|s| s.id() != id);
        let removed = subscriptions.len() < before;
        if removed {
            debug!(%id, "Subscription unregistered");
        }
        removed
    }

    /// All subscriptions whose pattern matches the subject, in registration
    /// order. Deterministic, no side effects.
    pub fn matching(&self, subject: &str) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .expect("subscription registry lock poisoned")
            .iter()
            .filter(|s| s.pattern().matches(subject))
            .cloned()
            .collect()
    }

    /// Snapshot of every registered subscription.
    pub fn all(&self) -> Vec<Arc<Subscription>> {
        self.subscriptions
            .read()
            .expect("subscription registry lock poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.subscriptions
            .read()
            .expect("subscription registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns: Vec<String> = self
            .all()
            .iter()
            .map(|s| s.pattern().as_str().to_string())
            .collect();
        f.debug_struct("SubscriptionRegistry")
            .field("patterns", &patterns)
            .finish()
    }
}
