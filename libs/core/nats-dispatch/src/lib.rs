//! NATS push-subscription dispatcher.
//!
//! Applications register handlers against subject patterns; the dispatcher
//! bridges inbound broker messages to every matching subscription, bounds
//! concurrency per subscription with a worker pool, validates payloads
//! before the handler runs, and leaves acknowledgement to the handler
//! (at-least-once push model).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────────────┐
//! │     NATS     │────▶│  Dispatcher  │────▶│     Worker Pool     │
//! │ (core or JS) │     │ (fan-out by  │     │ (N slots, bounded   │
//! └──────────────┘     │  pattern)    │     │  FIFO queue)        │
//!        ▲             └──────────────┘     └─────────────────────┘
//!        │                                    │           │
//!        │                                    ▼           ▼
//!        │                             ┌───────────┐ ┌──────────┐
//!        └──── ack / nak / term ◀──────│ Validator │ │ Handler  │
//!                                      └───────────┘ └──────────┘
//! ```
//!
//! # Key Features
//!
//! - **Pattern fan-out**: a subject is routed to every subscription whose
//!   pattern matches it (`*` / `>` wildcards)
//! - **Bounded concurrency**: at most `workers` handler invocations in
//!   flight per subscription; bounded queues apply backpressure to the
//!   broker read loop
//! - **Validation gate**: invalid payloads never reach the handler; the
//!   subscription's validation-error hook fires exactly once per bad message
//! - **Failure isolation**: a handler error or panic naks one message and
//!   frees the slot; it never stalls the pool
//! - **Graceful drain**: shutdown stops intake, waits for in-flight work up
//!   to a timeout, then abandons stalled slots
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{handler_fn, Schema, SchemaValidator, Subscription};
//! use nats_dispatch::{App, AppConfig};
//!
//! let app = App::new(AppConfig::new("js_listen_push").with_jetstream(true));
//!
//! let handler = handler_fn("print_msg", |message, worker| async move {
//!     tracing::info!(subject = message.subject(), %worker, "got message");
//!     message.ack().await.map_err(|e| HandlerError::transient(e.to_string()))?;
//!     Ok(())
//! });
//!
//! app.register(
//!     Subscription::builder("test.*.stream", handler)
//!         .workers(10)
//!         .validator(SchemaValidator::new(schema)),
//! )?;
//!
//! app.run().await?;
//! ```

mod app;
mod config;
mod connection;
mod dispatcher;
mod error;
mod health;
pub mod metrics;
mod worker;

pub use app::App;
pub use config::AppConfig;
pub use connection::NatsBroker;
pub use dispatcher::{Dispatcher, DispatcherState};
pub use error::DispatchError;
pub use health::{HealthServer, HealthState};
pub use metrics::{init_metrics, DispatchMetrics};

// Re-export from messaging
pub use messaging::{
    handler_fn, ConfigError, Handler, HandlerError, Message, Subscription, SubscriptionBuilder,
    SubscriptionId, SubscriptionRegistry, ValidationErrorHook, WorkerId,
};
