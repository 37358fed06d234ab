//! Event store collaborator for the ticket allocation system.
//!
//! Provides the append-with-expected-version protocol that every aggregate
//! relies on for optimistic concurrency, plus an in-memory implementation.

pub mod error;
pub mod event;
pub mod memory;
pub mod query;
pub mod store;

pub use common::AggregateId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use query::EventQuery;
pub use store::{AppendOptions, EventStore, EventStoreExt};
