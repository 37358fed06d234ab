//! Shared identifier types for the ticket allocation system.

pub mod types;

pub use types::{AggregateId, AllocatorId, TicketId, TicketListId};
