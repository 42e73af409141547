//! End-to-end dispatch behavior against the in-process broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use messaging::{
    handler_fn, Handler, HandlerError, Message, Schema, SchemaValidator, Subscription,
    SubscriptionRegistry, ValidationErrorHook, ValidationResult,
};
use nats_dispatch::{Dispatcher, DispatcherState, DispatchMetrics};
use test_utils::MemoryBroker;
use tokio::sync::watch;

const WAIT: Duration = Duration::from_secs(5);

fn metrics() -> DispatchMetrics {
    DispatchMetrics::new("test")
}

fn counting_ack_handler(counter: Arc<AtomicUsize>) -> Arc<dyn Handler> {
    handler_fn("counting", move |message, _worker| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            message
                .ack()
                .await
                .map_err(|e| HandlerError::transient(e.to_string()))
        }
    })
}

async fn wait_for(condition: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

struct CountingHook {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ValidationErrorHook for CountingHook {
    async fn on_validation_error(&self, _message: Message, result: &ValidationResult) {
        assert!(!result.is_valid());
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hook that acks the invalid message, marking it handled.
struct AckingHook;

#[async_trait]
impl ValidationErrorHook for AckingHook {
    async fn on_validation_error(&self, message: Message, _result: &ValidationResult) {
        message.ack().await.unwrap();
    }
}

fn comment_schema() -> Schema {
    Schema::object()
        .property("external_id", Schema::string())
        .property("text", Schema::string())
        .required(["external_id"])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn fan_out_reaches_every_matching_subscription() {
    let registry = Arc::new(SubscriptionRegistry::new());
    let star_count = Arc::new(AtomicUsize::new(0));
    let tail_count = Arc::new(AtomicUsize::new(0));
    registry.register(
        Subscription::builder("test.*.stream", counting_ack_handler(star_count.clone()))
            .build()
            .unwrap(),
    );
    registry.register(
        Subscription::builder("test.>", counting_ack_handler(tail_count.clone()))
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(registry.clone(), WAIT, metrics());
    let run = tokio::spawn(dispatcher.run(inbound, shutdown_rx));

    broker.publish("test.a.stream", "{}").await.unwrap();

    assert!(
        wait_for(
            || star_count.load(Ordering::SeqCst) == 1 && tail_count.load(Ordering::SeqCst) == 1,
            WAIT
        )
        .await
    );

    // One broker delivery, fanned out to both subscriptions; the shared
    // responded flag means only the first ack reaches the broker
    assert_eq!(broker.ack_log().acked_count(), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_is_bounded_per_subscription() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let high_water = Arc::new(AtomicUsize::new(0));

    let handler = {
        let in_flight = in_flight.clone();
        let high_water = high_water.clone();
        handler_fn("slow", move |message, _worker| {
            let in_flight = in_flight.clone();
            let high_water = high_water.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                high_water.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                message
                    .ack()
                    .await
                    .map_err(|e| HandlerError::transient(e.to_string()))
            }
        })
    };

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("jobs.>", handler)
            .workers(3)
            .queue_capacity(64)
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    for i in 0..12 {
        broker
            .publish(&format!("jobs.batch.{}", i), "{}")
            .await
            .unwrap();
    }

    assert!(log.wait_for_acked(12, WAIT).await);
    assert!(high_water.load(Ordering::SeqCst) <= 3);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn invalid_payload_never_reaches_the_handler() {
    let handled = Arc::new(AtomicUsize::new(0));
    let hook_calls = Arc::new(AtomicUsize::new(0));

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("test.*.stream", counting_ack_handler(handled.clone()))
            .workers(10)
            .validator(SchemaValidator::new(comment_schema()))
            .on_validation_error(CountingHook {
                calls: hook_calls.clone(),
            })
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    // Missing required external_id: hook fires exactly once, handler never
    broker
        .publish("test.a.stream", r#"{"text": "no id"}"#)
        .await
        .unwrap();
    assert!(wait_for(|| hook_calls.load(Ordering::SeqCst) == 1, WAIT).await);
    assert!(
        log.wait_until(|log| log.naked_count() == 1, WAIT).await,
        "invalid message should be nak'd"
    );
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    // Valid payload flows through to the handler
    broker
        .publish("test.a.stream", r#"{"external_id": "ext-1"}"#)
        .await
        .unwrap();
    assert!(log.wait_for_acked(1, WAIT).await);
    assert_eq!(handled.load(Ordering::SeqCst), 1);
    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hook_can_mark_an_invalid_message_handled() {
    let handled = Arc::new(AtomicUsize::new(0));

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("test.*.stream", counting_ack_handler(handled.clone()))
            .validator(SchemaValidator::new(comment_schema()))
            .on_validation_error(AckingHook)
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    broker
        .publish("test.a.stream", r#"{"text": "no id"}"#)
        .await
        .unwrap();

    assert!(log.wait_for_acked(1, WAIT).await);
    assert_eq!(log.naked_count(), 0);
    assert_eq!(handled.load(Ordering::SeqCst), 0);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_failure_does_not_stall_the_pool() {
    let handler = handler_fn("sometimes_fails", |message, _worker| async move {
        if message.payload().as_ref() == b"boom" {
            return Err(HandlerError::transient("simulated failure"));
        }
        message
            .ack()
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("jobs.>", handler)
            .workers(1)
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    broker.publish("jobs.first", "boom").await.unwrap();
    for i in 0..3 {
        broker
            .publish(&format!("jobs.after.{}", i), "{}")
            .await
            .unwrap();
    }

    // The single slot survives the failure and processes the rest
    assert!(log.wait_for_acked(3, WAIT).await);
    assert_eq!(log.naked_count(), 1);

    // Transient failure on first delivery naks with the base backoff
    let (_, delay) = log.naked()[0];
    assert_eq!(delay, Some(Duration::from_millis(1000)));

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permanent_errors_terminate_the_message() {
    let handler = handler_fn("rejects", |_message, _worker| async move {
        Err(HandlerError::permanent("unprocessable"))
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(Subscription::builder("jobs.>", handler).build().unwrap());

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    broker.publish("jobs.poison", "{}").await.unwrap();

    assert!(log.wait_until(|log| log.termed_count() == 1, WAIT).await);
    assert_eq!(log.naked_count(), 0);
    assert_eq!(log.acked_count(), 0);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn handler_panic_does_not_stall_the_pool() {
    let handler = handler_fn("panics", |message, _worker| async move {
        if message.payload().as_ref() == b"boom" {
            panic!("simulated panic");
        }
        message
            .ack()
            .await
            .map_err(|e| HandlerError::transient(e.to_string()))
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("jobs.>", handler)
            .workers(1)
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    broker.publish("jobs.first", "boom").await.unwrap();
    broker.publish("jobs.second", "{}").await.unwrap();
    broker.publish("jobs.third", "{}").await.unwrap();

    assert!(log.wait_for_acked(2, WAIT).await);
    assert_eq!(log.naked_count(), 1);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn drain_reaches_stopped_despite_a_stalled_handler() {
    let handler = handler_fn("stalled", |_message, _worker| async move {
        std::future::pending::<()>().await;
        Ok(())
    });

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(Subscription::builder("jobs.>", handler).build().unwrap());

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(registry, Duration::from_millis(200), metrics());
    let state = dispatcher.state();
    let run = tokio::spawn(dispatcher.run(inbound, shutdown_rx));

    broker.publish("jobs.stuck", "{}").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = Instant::now();
    shutdown_tx.send(true).unwrap();
    run.await.unwrap();

    // Forced abandonment: drain completed well before the handler ever would
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(*state.borrow(), DispatcherState::Stopped);
    // The in-flight message was never acknowledged; the broker would redeliver
    assert_eq!(log.acked_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_25_messages_across_10_workers() {
    let handled = Arc::new(AtomicUsize::new(0));

    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("test.*.stream", counting_ack_handler(handled.clone()))
            .workers(10)
            .queue_capacity(32)
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let log = broker.ack_log();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run = tokio::spawn(Dispatcher::new(registry, WAIT, metrics()).run(inbound, shutdown_rx));

    // Both concrete subjects match; the deeper subject does not
    for i in 0..25 {
        let subject = if i % 2 == 0 {
            "test.a.stream"
        } else {
            "test.b.stream"
        };
        broker.publish(subject, "{}").await.unwrap();
    }
    assert!(broker.publish("test.a.b.stream", "{}").await.is_none());

    assert!(log.wait_for_acked(25, WAIT).await);
    assert_eq!(handled.load(Ordering::SeqCst), 25);
    assert_eq!(log.naked_count(), 0);

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispatcher_walks_its_lifecycle_states() {
    let registry = Arc::new(SubscriptionRegistry::new());
    registry.register(
        Subscription::builder("test.>", Arc::new(messaging::AckHandler))
            .build()
            .unwrap(),
    );

    let broker = MemoryBroker::new();
    let inbound = broker.inbound(&registry);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let dispatcher = Dispatcher::new(registry, WAIT, metrics());
    let mut state = dispatcher.state();
    assert_eq!(*state.borrow(), DispatcherState::Stopped);

    let run = tokio::spawn(dispatcher.run(inbound, shutdown_rx));

    state
        .wait_for(|s| *s == DispatcherState::Running)
        .await
        .unwrap();

    shutdown_tx.send(true).unwrap();
    run.await.unwrap();
    assert_eq!(*state.borrow(), DispatcherState::Stopped);
}
