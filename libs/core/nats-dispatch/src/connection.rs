//! NATS broker connection and inbound message streams.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream;
use async_trait::async_trait;
use futures::stream::{BoxStream, SelectAll};
use futures::StreamExt;
use messaging::{Delivery, DeliveryError, Message, NoopDelivery, SubscriptionRegistry};
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::DispatchError;

/// Connection to the NATS broker.
///
/// Produces the merged inbound stream the dispatcher consumes: one broker
/// subscription per distinct registered pattern, core NATS or JetStream
/// depending on configuration. Reconnection after startup is handled inside
/// the async-nats client.
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: Option<jetstream::Context>,
    config: AppConfig,
}

impl NatsBroker {
    /// Connect to the broker, announcing the configured service name.
    pub async fn connect(config: &AppConfig) -> Result<Self, DispatchError> {
        let url = config.url();
        info!(url = %url, service = %config.service_name, "Connecting to NATS");

        let client = async_nats::ConnectOptions::new()
            .name(&config.service_name)
            .connect(&url)
            .await?;
        info!("Connected to NATS");

        let jetstream = if config.enable_jetstream {
            debug!("JetStream context created");
            Some(jetstream::new(client.clone()))
        } else {
            None
        };

        Ok(Self {
            client,
            jetstream,
            config: config.clone(),
        })
    }

    pub fn client(&self) -> async_nats::Client {
        self.client.clone()
    }

    /// Subscribe every distinct registered pattern and merge the resulting
    /// streams into one inbound stream, per-subject order preserved by the
    /// broker up to this point.
    pub async fn inbound(
        &self,
        registry: &SubscriptionRegistry,
    ) -> Result<BoxStream<'static, Message>, DispatchError> {
        let mut patterns: Vec<String> = Vec::new();
        let mut seen = HashSet::new();
        for subscription in registry.all() {
            let pattern = subscription.pattern().as_str().to_string();
            if seen.insert(pattern.clone()) {
                patterns.push(pattern);
            }
        }

        if let Some(js) = &self.jetstream {
            self.ensure_stream(js, patterns.clone()).await?;
        }

        let mut streams: SelectAll<BoxStream<'static, Message>> = SelectAll::new();
        for pattern in &patterns {
            let stream = match &self.jetstream {
                Some(js) => self.subscribe_jetstream(js, pattern).await?,
                None => self.subscribe_core(pattern).await?,
            };
            streams.push(stream);
        }

        Ok(streams.boxed())
    }

    async fn subscribe_core(
        &self,
        pattern: &str,
    ) -> Result<BoxStream<'static, Message>, DispatchError> {
        let subscriber = self
            .client
            .subscribe(pattern.to_string())
            .await
            .map_err(|e| DispatchError::subscribe_error(pattern, e))?;

        debug!(subject = pattern, "Core subscription created");

        let stream = subscriber
            .map(|msg| Message::new(msg.subject.to_string(), msg.payload, Arc::new(NoopDelivery)));
        Ok(stream.boxed())
    }

    /// Ensure the configured stream exists, creating it over the registered
    /// patterns if necessary.
    async fn ensure_stream(
        &self,
        js: &jetstream::Context,
        subjects: Vec<String>,
    ) -> Result<(), DispatchError> {
        match js.get_stream(&self.config.stream_name).await {
            Ok(_) => {
                debug!(stream = %self.config.stream_name, "Stream already exists");
                Ok(())
            }
            Err(_) => {
                info!(
                    stream = %self.config.stream_name,
                    subjects = ?subjects,
                    "Creating stream"
                );

                js.create_stream(jetstream::stream::Config {
                    name: self.config.stream_name.clone(),
                    subjects,
                    max_messages: self.config.max_stream_messages,
                    max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
                    ..Default::default()
                })
                .await
                .map_err(DispatchError::from_jetstream_error)?;

                info!(stream = %self.config.stream_name, "Stream created");
                Ok(())
            }
        }
    }

    async fn subscribe_jetstream(
        &self,
        js: &jetstream::Context,
        pattern: &str,
    ) -> Result<BoxStream<'static, Message>, DispatchError> {
        let stream = js
            .get_stream(&self.config.stream_name)
            .await
            .map_err(DispatchError::from_jetstream_error)?;

        let durable = durable_name(&self.config.service_name, pattern);

        // Reuse the durable consumer across restarts
        let consumer = match stream
            .get_consumer::<jetstream::consumer::pull::Config>(&durable)
            .await
        {
            Ok(consumer) => {
                debug!(consumer = %durable, "Consumer already exists");
                consumer
            }
            Err(_) => {
                info!(
                    consumer = %durable,
                    stream = %self.config.stream_name,
                    subject = pattern,
                    "Creating consumer"
                );

                stream
                    .create_consumer(jetstream::consumer::pull::Config {
                        durable_name: Some(durable.clone()),
                        name: Some(durable.clone()),
                        ack_policy: jetstream::consumer::AckPolicy::Explicit,
                        ack_wait: self.config.ack_wait,
                        filter_subject: pattern.to_string(),
                        ..Default::default()
                    })
                    .await
                    .map_err(DispatchError::from_jetstream_error)?
            }
        };

        // The pull stream only requests messages as the dispatcher polls it,
        // so queue backpressure propagates all the way to the broker.
        let messages = consumer
            .messages()
            .await
            .map_err(DispatchError::from_jetstream_error)?;

        let stream = messages.filter_map(|item| async move {
            match item {
                Ok(message) => Some(into_message(message)),
                Err(e) => {
                    warn!(error = %e, "Error receiving JetStream message");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }
}

fn into_message(message: jetstream::Message) -> Message {
    let delivered = match message.info() {
        Ok(info) => info.delivered as u32,
        Err(e) => {
            warn!(error = %e, "Failed to get message info, using defaults");
            1
        }
    };

    let subject = message.subject.to_string();
    let payload = message.payload.clone();
    Message::jetstream(subject, payload, Arc::new(JsDelivery(message)), delivered)
}

/// Durable consumer name for a pattern: subject separators and wildcards are
/// not allowed in consumer names.
fn durable_name(service_name: &str, pattern: &str) -> String {
    let sanitized = pattern
        .replace('.', "-")
        .replace('*', "any")
        .replace('>', "all");
    format!("{}-{}", service_name, sanitized)
}

/// Acknowledgement capability backed by a JetStream delivery handle.
struct JsDelivery(jetstream::Message);

#[async_trait]
impl Delivery for JsDelivery {
    async fn ack(&self) -> Result<(), DeliveryError> {
        self.0
            .ack()
            .await
            .map_err(|e| DeliveryError::ack_error(e.to_string()))
    }

    async fn nak(&self, delay: Option<Duration>) -> Result<(), DeliveryError> {
        self.0
            .ack_with(jetstream::AckKind::Nak(delay))
            .await
            .map_err(|e| DeliveryError::ack_error(e.to_string()))
    }

    async fn term(&self) -> Result<(), DeliveryError> {
        self.0
            .ack_with(jetstream::AckKind::Term)
            .await
            .map_err(|e| DeliveryError::ack_error(e.to_string()))
    }
}
