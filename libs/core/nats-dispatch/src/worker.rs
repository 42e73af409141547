//! Per-subscription worker pools.
//!
//! Each subscription gets `workers` slots sharing one bounded FIFO queue.
//! A slot dequeues a message, runs the validation gate, then invokes the
//! handler. Acknowledgement is the handler's job; the pool only responds for
//! it on validation failure, handler error, or panic. No per-message outcome
//! ever stalls the pool.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use messaging::{ErrorCategory, Message, Subscription, WorkerId};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::metrics::DispatchMetrics;

pub(crate) struct WorkerPool {
    tx: mpsc::Sender<Message>,
    handles: Vec<JoinHandle<()>>,
    pattern: String,
}

impl WorkerPool {
    /// Spawn the subscription's worker slots over a fresh bounded queue.
    pub fn start(subscription: Arc<Subscription>, metrics: DispatchMetrics) -> Self {
        let (tx, rx) = mpsc::channel(subscription.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let pattern = subscription.pattern().as_str().to_string();

        let mut handles = Vec::with_capacity(subscription.workers());
        for index in 0..subscription.workers() {
            let worker = WorkerId::new(index);
            let rx = rx.clone();
            let subscription = subscription.clone();
            let metrics = metrics.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(subscription, worker, rx, metrics).await;
            }));
        }

        Self {
            tx,
            handles,
            pattern,
        }
    }

    /// Enqueue a message, waiting for queue capacity (backpressure).
    pub async fn enqueue(&self, message: Message) {
        if self.tx.send(message).await.is_err() {
            warn!(pattern = %self.pattern, "Worker pool queue closed, dropping message");
        }
    }

    /// Close the queue. Slots finish the already-queued messages and exit;
    /// the returned handles let the caller await or abort them.
    pub fn close(self) -> Vec<JoinHandle<()>> {
        drop(self.tx);
        self.handles
    }
}

async fn worker_loop(
    subscription: Arc<Subscription>,
    worker: WorkerId,
    rx: Arc<Mutex<mpsc::Receiver<Message>>>,
    metrics: DispatchMetrics,
) {
    let pattern = subscription.pattern().as_str().to_string();
    debug!(pattern = %pattern, %worker, "Worker slot started");

    loop {
        // Hold the lock only while dequeuing so other slots keep pulling
        let message = { rx.lock().await.recv().await };
        let Some(message) = message else {
            break;
        };
        process(&subscription, message, &worker, &metrics).await;
    }

    debug!(pattern = %pattern, %worker, "Worker slot stopped");
}

async fn process(
    subscription: &Subscription,
    message: Message,
    worker: &WorkerId,
    metrics: &DispatchMetrics,
) {
    let subject = message.subject().to_string();
    let pattern = subscription.pattern().as_str();
    let handler = subscription.handler().clone();
    metrics.message_received(pattern, handler.name());

    if message.is_redelivery() {
        debug!(
            subject = %subject,
            %worker,
            delivery_count = message.delivery_count(),
            "Processing redelivered message"
        );
    }

    // Validation gate: an invalid payload never reaches the handler
    if let Some(validator) = subscription.validator() {
        let verdict = validator.validate(message.payload());
        if !verdict.is_valid() {
            warn!(
                subject = %subject,
                %worker,
                violations = verdict.violations().len(),
                detail = %verdict,
                "Payload failed validation"
            );
            metrics.validation_failed(pattern, handler.name());

            if let Some(hook) = subscription.validation_hook() {
                hook.on_validation_error(message.clone(), &verdict).await;
            }

            // The hook may have marked the message handled (ack/term)
            if !message.has_responded() {
                if let Err(e) = message.nak(None).await {
                    warn!(subject = %subject, error = %e, "Failed to nak invalid message");
                }
            }
            return;
        }
    }

    let start = Instant::now();
    let outcome = AssertUnwindSafe(handler.handle(message.clone(), worker.clone()))
        .catch_unwind()
        .await;
    let duration = start.elapsed();

    match outcome {
        Ok(Ok(())) => {
            metrics.message_handled(pattern, handler.name(), duration);
            debug!(
                subject = %subject,
                %worker,
                duration_ms = duration.as_millis() as u64,
                "Message handled"
            );
            if !message.has_responded() {
                // Push model: the broker redelivers after the ack deadline
                debug!(
                    subject = %subject,
                    %worker,
                    "Handler returned without acknowledging"
                );
            }
        }
        Ok(Err(err)) => {
            let category = err.category();
            error!(
                subject = %subject,
                %worker,
                error = %err,
                category = %category,
                "Handler failed"
            );
            metrics.handler_failed(pattern, handler.name(), &category.to_string());

            if !message.has_responded() {
                let attempt = message.delivery_count().saturating_sub(1);
                let result = match category {
                    // Permanent: terminate, the broker must not redeliver
                    ErrorCategory::Permanent => message.term().await,
                    _ => {
                        let delay = Duration::from_millis(err.backoff_delay_ms(attempt));
                        message.nak(Some(delay)).await
                    }
                };
                if let Err(e) = result {
                    warn!(subject = %subject, error = %e, "Failed to respond after handler error");
                }
            }
        }
        Err(_) => {
            error!(subject = %subject, %worker, "Handler panicked");
            metrics.handler_panicked(pattern, handler.name());

            if !message.has_responded() {
                if let Err(e) = message.nak(None).await {
                    warn!(subject = %subject, error = %e, "Failed to nak after handler panic");
                }
            }
        }
    }
}
