//! Saga error types.

use common::AllocatorId;
use domain::DomainError;
use event_store::EventStoreError;
use thiserror::Error;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// An event was decided in a phase that cannot accept it.
    ///
    /// This is a sequencing defect, never an expected outcome; processing of
    /// the affected allocator stops.
    #[error("Illegal transition: {event} in phase {phase}")]
    IllegalTransition {
        event: &'static str,
        phase: &'static str,
    },

    /// A command was refused in the allocator's current phase.
    #[error("Command {command} rejected in phase {phase}")]
    CommandRejected {
        command: &'static str,
        phase: &'static str,
    },

    /// The allocator is already running a transaction.
    #[error("Allocator {0} has already been started")]
    AlreadyStarted(AllocatorId),

    /// The allocator has never been started.
    #[error("Allocator not found: {0}")]
    NotFound(AllocatorId),

    /// Ticket list service error.
    #[error("Ticket list service error: {0}")]
    TicketList(String),

    /// The worker pool was closed while calls were pending.
    #[error("Worker pool closed: {0}")]
    PoolClosed(#[from] tokio::sync::AcquireError),

    /// Domain error.
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Event store error.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Returns true for optimistic concurrency conflicts, retried or not.
    pub fn is_conflict(&self) -> bool {
        match self {
            SagaError::Domain(e) => e.is_conflict(),
            SagaError::EventStore(e) => e.is_conflict(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
