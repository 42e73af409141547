//! In-process broker with acknowledgement recording.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use messaging::{Delivery, DeliveryError, Message, SubjectPattern, SubscriptionRegistry};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

/// Record of every acknowledgement the broker has seen, keyed by publish
/// sequence number.
#[derive(Debug, Default)]
pub struct AckLog {
    acked: Mutex<Vec<u64>>,
    naked: Mutex<Vec<(u64, Option<Duration>)>>,
    termed: Mutex<Vec<u64>>,
}

impl AckLog {
    pub fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub fn naked(&self) -> Vec<(u64, Option<Duration>)> {
        self.naked.lock().unwrap().clone()
    }

    pub fn termed(&self) -> Vec<u64> {
        self.termed.lock().unwrap().clone()
    }

    pub fn acked_count(&self) -> usize {
        self.acked.lock().unwrap().len()
    }

    pub fn naked_count(&self) -> usize {
        self.naked.lock().unwrap().len()
    }

    pub fn termed_count(&self) -> usize {
        self.termed.lock().unwrap().len()
    }

    /// Poll until the condition holds or the timeout elapses. Returns
    /// whether the condition was met.
    pub async fn wait_until<F>(&self, condition: F, timeout: Duration) -> bool
    where
        F: Fn(&AckLog) -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if condition(self) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until at least `count` messages were acked.
    pub async fn wait_for_acked(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(|log| log.acked_count() >= count, timeout).await
    }
}

/// Acknowledgement capability that records into an [`AckLog`].
struct RecordedDelivery {
    log: Arc<AckLog>,
    sequence: u64,
}

#[async_trait]
impl Delivery for RecordedDelivery {
    async fn ack(&self) -> Result<(), DeliveryError> {
        self.log.acked.lock().unwrap().push(self.sequence);
        Ok(())
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<(), DeliveryError> {
        self.log.naked.lock().unwrap().push((self.sequence, delay));
        Ok(())
    }

    async fn term(&self) -> Result<(), DeliveryError> {
        self.log.termed.lock().unwrap().push(self.sequence);
        Ok(())
    }
}

/// In-process broker for integration tests.
///
/// Models an ideal broker: each published message is delivered exactly once
/// into the inbound stream when any bound pattern matches its subject, and
/// every acknowledgement is recorded in the [`AckLog`].
///
/// # Example
///
/// ```rust,ignore
/// let broker = MemoryBroker::new();
/// let inbound = broker.inbound(&registry);
/// let seq = broker.publish("test.a.stream", r#"{"external_id": "1"}"#).await;
/// assert!(broker.ack_log().wait_for_acked(1, Duration::from_secs(1)).await);
/// ```
pub struct MemoryBroker {
    patterns: Mutex<Vec<SubjectPattern>>,
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    log: Arc<AckLog>,
    sequence: AtomicU64,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            patterns: Mutex::new(Vec::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            log: Arc::new(AckLog::default()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn ack_log(&self) -> Arc<AckLog> {
        self.log.clone()
    }

    /// Bind every registered pattern and return the merged inbound stream.
    ///
    /// Panics when called twice; the inbound stream can only be taken once.
    pub fn inbound(&self, registry: &SubscriptionRegistry) -> BoxStream<'static, Message> {
        {
            let mut patterns = self.patterns.lock().unwrap();
            for subscription in registry.all() {
                patterns.push(subscription.pattern().clone());
            }
        }
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("inbound stream already taken");
        UnboundedReceiverStream::new(rx).boxed()
    }

    /// Bind an additional pattern directly (tests without a registry).
    pub fn bind(&self, pattern: &str) {
        let pattern = SubjectPattern::parse(pattern).expect("invalid test pattern");
        self.patterns.lock().unwrap().push(pattern);
    }

    /// Publish a message. Returns the sequence number when the subject
    /// matched a bound pattern and was delivered, `None` otherwise.
    pub async fn publish(&self, subject: &str, payload: impl Into<Bytes>) -> Option<u64> {
        let matched = self
            .patterns
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.matches(subject));
        if !matched {
            debug!(subject, "No bound pattern matches, message not delivered");
            return None;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = Arc::new(RecordedDelivery {
            log: self.log.clone(),
            sequence,
        });
        let message = Message::jetstream(subject, payload.into(), delivery, 1);
        self.tx.send(message).ok()?;
        Some(sequence)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}
