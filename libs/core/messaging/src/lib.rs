//! Backend-agnostic messaging abstractions for push-subscription dispatch.
//!
//! This library provides the broker-independent half of the dispatch
//! framework:
//! - **Subject patterns**: dot-delimited routing keys with `*` (one token)
//!   and `>` (trailing tokens) wildcards
//! - **Payload validation**: declarative structural schemas checked before a
//!   handler ever runs
//! - **Subscriptions**: immutable bindings of a pattern to a handler, a
//!   worker count, and an optional validator
//! - **Messages**: payload plus an explicit acknowledgement capability
//!   (`ack`/`nak`/`term`), respond-at-most-once
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐     ┌──────────────────────────────────────┐
//! │    Your Code     │     │              Backends                │
//! │                  │     │                                      │
//! │  ┌────────────┐  │     │  ┌───────────────┐ ┌──────────────┐  │
//! │  │  Handler   │──│─────│─▶│ nats-dispatch │ │  test-utils  │  │
//! │  └────────────┘  │     │  │  (NATS / JS)  │ │ (in-process) │  │
//! │  ┌────────────┐  │     │  └───────────────┘ └──────────────┘  │
//! │  │  Schema    │──│─────│─▶        ▲                ▲          │
//! │  └────────────┘  │     │          │                │          │
//! │                  │     │     Same traits, different brokers   │
//! └──────────────────┘     └──────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use messaging::{handler_fn, Schema, SchemaValidator, Subscription};
//!
//! let schema = Schema::object()
//!     .property("external_id", Schema::string())
//!     .required(["external_id"]);
//!
//! let subscription = Subscription::builder("test.*.stream", handler)
//!     .workers(10)
//!     .validator(SchemaValidator::new(schema))
//!     .build()?;
//! ```

mod error;
mod handler;
mod message;
mod subject;
mod subscription;
mod validator;

pub use error::{ConfigError, ErrorCategory, HandlerError};
pub use handler::{
    handler_fn, AckHandler, FailingHandler, Handler, NoOpHandler, ValidationErrorHook, WorkerId,
};
pub use message::{Delivery, DeliveryError, Message, NoopDelivery};
pub use subject::{PatternError, SubjectPattern};
pub use subscription::{Subscription, SubscriptionBuilder, SubscriptionId, SubscriptionRegistry};
pub use validator::{
    validate, PayloadValidator, Schema, SchemaError, SchemaType, SchemaValidator,
    ValidationResult, Violation, ViolationKind,
};
