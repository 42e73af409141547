//! Test infrastructure for the dispatch framework.
//!
//! Provides [`MemoryBroker`], an in-process broker that implements the
//! messaging delivery traits and records every acknowledgement, so
//! integration tests can assert ack/nak/term behavior without a NATS server.

mod broker;

pub use broker::{AckLog, MemoryBroker};
