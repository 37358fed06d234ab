//! Domain layer for the ticket allocation system.
//!
//! This crate provides the core domain abstractions including:
//! - Aggregate trait for event-sourced entities
//! - Accumulator for composing several decisions into one atomic append
//! - CommandHandler for read-decide-append with optimistic concurrency retry
//! - Ticket aggregate with its ownership decision logic

pub mod accumulator;
pub mod aggregate;
pub mod command;
pub mod error;
pub mod ticket;

pub use accumulator::Accumulator;
pub use aggregate::{Aggregate, DomainEvent, LoadStrategy};
pub use command::{CommandHandler, CommandResult, DEFAULT_MAX_ATTEMPTS};
pub use error::DomainError;
pub use ticket::{Ticket, TicketEvent, TicketIntent, TicketService, TicketState};
