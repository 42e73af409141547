//! Dispatcher: bridges inbound broker messages to matching subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use messaging::{Message, SubscriptionId, SubscriptionRegistry};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics::DispatchMetrics;
use crate::worker::WorkerPool;

/// Dispatcher lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatcherState {
    Stopped,
    Starting,
    Running,
    Draining,
}

impl fmt::Display for DispatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatcherState::Stopped => write!(f, "stopped"),
            DispatcherState::Starting => write!(f, "starting"),
            DispatcherState::Running => write!(f, "running"),
            DispatcherState::Draining => write!(f, "draining"),
        }
    }
}

/// Bridges the merged inbound stream to per-subscription worker pools.
///
/// Lifecycle: `Stopped → Starting → Running → Draining → Stopped`. While
/// `Running`, every inbound message is matched against the registry and a
/// clone is enqueued into each matching pool; a full queue blocks the loop,
/// deferring further broker reads (backpressure).
pub struct Dispatcher {
    registry: Arc<SubscriptionRegistry>,
    drain_timeout: Duration,
    metrics: DispatchMetrics,
    state_tx: watch::Sender<DispatcherState>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        drain_timeout: Duration,
        metrics: DispatchMetrics,
    ) -> Self {
        let (state_tx, _) = watch::channel(DispatcherState::Stopped);
        Self {
            registry,
            drain_timeout,
            metrics,
            state_tx,
        }
    }

    /// Observe dispatcher state transitions.
    pub fn state(&self) -> watch::Receiver<DispatcherState> {
        self.state_tx.subscribe()
    }

    /// Run until the shutdown signal fires or the inbound stream ends, then
    /// drain.
    ///
    /// Drain stops intake, lets the pools finish queued work, and waits up
    /// to the drain timeout before abandoning stalled slots (their in-flight
    /// messages stay unacknowledged for broker-side redelivery).
    pub async fn run(
        self,
        inbound: BoxStream<'static, Message>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        self.set_state(DispatcherState::Starting);

        let mut pools: HashMap<SubscriptionId, WorkerPool> = HashMap::new();
        for subscription in self.registry.all() {
            pools.insert(
                subscription.id(),
                WorkerPool::start(subscription, self.metrics.clone()),
            );
        }

        info!(subscriptions = pools.len(), "Dispatcher running");
        self.set_state(DispatcherState::Running);

        let mut inbound = inbound;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, draining dispatcher");
                        break;
                    }
                }

                next = inbound.next() => match next {
                    Some(message) => self.route(&pools, message).await,
                    None => {
                        info!("Inbound stream ended, draining dispatcher");
                        break;
                    }
                }
            }
        }

        self.drain(pools).await;
    }

    /// Fan a message out to every matching subscription's pool.
    async fn route(&self, pools: &HashMap<SubscriptionId, WorkerPool>, message: Message) {
        let matches = self.registry.matching(message.subject());
        if matches.is_empty() {
            debug!(subject = message.subject(), "No subscription matches subject");
            self.metrics.unmatched_subject();
            return;
        }

        for subscription in matches {
            if let Some(pool) = pools.get(&subscription.id()) {
                // Awaits queue capacity: backpressure defers broker reads
                pool.enqueue(message.clone()).await;
            }
        }
    }

    async fn drain(&self, pools: HashMap<SubscriptionId, WorkerPool>) {
        self.set_state(DispatcherState::Draining);

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for (_, pool) in pools {
            handles.extend(pool.close());
        }

        let drained = tokio::time::timeout(self.drain_timeout, async {
            for handle in handles.iter_mut() {
                // Err means the slot task panicked or was aborted; both are
                // already logged at the slot
                let _ = handle.await;
            }
        })
        .await;

        match drained {
            Ok(_) => info!("Dispatcher drained"),
            Err(_) => {
                warn!(
                    timeout_ms = self.drain_timeout.as_millis() as u64,
                    "Drain timeout elapsed, abandoning in-flight workers"
                );
                for handle in &handles {
                    handle.abort();
                }
            }
        }

        self.set_state(DispatcherState::Stopped);
    }

    fn set_state(&self, state: DispatcherState) {
        debug!(state = %state, "Dispatcher state changed");
        let _ = self.state_tx.send(state);
    }
}
