//! Messages and their acknowledgement capability.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error raised by acknowledgement operations or payload decoding.
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// The broker rejected or failed the acknowledgement
    #[error("acknowledgement failed: {0}")]
    Ack(String),

    /// Payload could not be decoded into the requested type
    #[error("payload decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// Create an acknowledgement error.
    pub fn ack_error(msg: impl Into<String>) -> Self {
        Self::Ack(msg.into())
    }
}

/// Broker-side acknowledgement primitives for one delivered message.
///
/// Implemented by each backend (JetStream handle, in-process test broker).
/// Handlers never see this trait directly; they go through [`Message`],
/// which enforces respond-at-most-once.
#[async_trait]
pub trait Delivery: Send + Sync {
    /// Positive acknowledgement: processing is complete.
    async fn ack(&self) -> Result<(), DeliveryError>;

    /// Negative acknowledgement: request redelivery, optionally delayed.
    async fn nak(&self, delay: Option<Duration>) -> Result<(), DeliveryError>;

    /// Terminate: never redeliver this message.
    async fn term(&self) -> Result<(), DeliveryError>;
}

/// Acknowledgement sink for plain (non-JetStream) messages, which carry no
/// broker-side delivery handle. Every operation succeeds without effect.
#[derive(Debug, Clone, Default)]
pub struct NoopDelivery;

#[async_trait]
impl Delivery for NoopDelivery {
    async fn ack(&self) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn nak(&self, _delay: Option<Duration>) -> Result<(), DeliveryError> {
        Ok(())
    }

    async fn term(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

struct MessageInner {
    subject: String,
    payload: Bytes,
    jetstream: bool,
    delivery_count: u32,
    delivery: Arc<dyn Delivery>,
    responded: AtomicBool,
}

/// One delivered message.
///
/// Cheaply cloneable: clones share the payload, the delivery handle, and the
/// responded flag, so fan-out copies cannot double-acknowledge the broker.
/// The first of `ack`/`nak`/`term` wins; later calls are no-ops.
#[derive(Clone)]
pub struct Message {
    inner: Arc<MessageInner>,
}

impl Message {
    /// Create a plain (core) message.
    pub fn new(subject: impl Into<String>, payload: Bytes, delivery: Arc<dyn Delivery>) -> Self {
        Self::build(subject, payload, delivery, false, 1)
    }

    /// Create a JetStream message with its delivery attempt count.
    pub fn jetstream(
        subject: impl Into<String>,
        payload: Bytes,
        delivery: Arc<dyn Delivery>,
        delivery_count: u32,
    ) -> Self {
        Self::build(subject, payload, delivery, true, delivery_count)
    }

    fn build(
        subject: impl Into<String>,
        payload: Bytes,
        delivery: Arc<dyn Delivery>,
        jetstream: bool,
        delivery_count: u32,
    ) -> Self {
        Self {
            inner: Arc::new(MessageInner {
                subject: subject.into(),
                payload,
                jetstream,
                delivery_count,
                delivery,
                responded: AtomicBool::new(false),
            }),
        }
    }

    /// The concrete subject this message arrived on.
    pub fn subject(&self) -> &str {
        &self.inner.subject
    }

    pub fn payload(&self) -> &Bytes {
        &self.inner.payload
    }

    pub fn is_jetstream(&self) -> bool {
        self.inner.jetstream
    }

    /// Delivery attempt count (1 for the first delivery).
    pub fn delivery_count(&self) -> u32 {
        self.inner.delivery_count
    }

    pub fn is_redelivery(&self) -> bool {
        self.inner.delivery_count > 1
    }

    /// Decode the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DeliveryError> {
        Ok(serde_json::from_slice(&self.inner.payload)?)
    }

    /// True once any of `ack`/`nak`/`term` has been called on any clone.
    pub fn has_responded(&self) -> bool {
        self.inner.responded.load(Ordering::SeqCst)
    }

    fn claim_response(&self) -> bool {
        !self.inner.responded.swap(true, Ordering::SeqCst)
    }

    /// Acknowledge successful processing.
    pub async fn ack(&self) -> Result<(), DeliveryError> {
        if !self.claim_response() {
            return Ok(());
        }
        self.inner.delivery.ack().await
    }

    /// Request redelivery, optionally after a delay.
    pub async fn nak(&self, delay: Option<Duration>) -> Result<(), DeliveryError> {
        if !self.claim_response() {
            return Ok(());
        }
        self.inner.delivery.nak(delay).await
    }

    /// Mark as permanently failed; the broker will not redeliver.
    pub async fn term(&self) -> Result<(), DeliveryError> {
        if !self.claim_response() {
            return Ok(());
        }
        self.inner.delivery.term().await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("subject", &self.inner.subject)
            .field("payload_len", &self.inner.payload.len())
            .field("jetstream", &self.inner.jetstream)
            .field("delivery_count", &self.inner.delivery_count)
            .field("responded", &self.has_responded())
            .finish()
    }
}
