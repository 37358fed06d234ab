//! Domain error types.

use std::convert::Infallible;

use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during domain operations.
#[derive(Debug, Error)]
pub enum DomainError {
    /// An error occurred in the event store.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Every attempt to append a decision lost the optimistic concurrency race.
    #[error("Gave up on {aggregate_type} {aggregate_id} after {attempts} conflicting attempts")]
    RetriesExhausted {
        aggregate_type: &'static str,
        aggregate_id: String,
        attempts: usize,
    },

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DomainError {
    /// Returns true if the error is a lost optimistic concurrency race,
    /// either a single conflict or an exhausted retry budget.
    pub fn is_conflict(&self) -> bool {
        match self {
            DomainError::EventStore(e) => e.is_conflict(),
            DomainError::RetriesExhausted { .. } => true,
            DomainError::Serialization(_) => false,
        }
    }
}

impl From<Infallible> for DomainError {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}
