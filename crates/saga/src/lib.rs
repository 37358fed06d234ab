//! Ticket allocation saga.
//!
//! A `TicketAllocator` saga tracks one transaction that reserves a set of
//! tickets, assigns them to lists and, on cancel or timeout, releases
//! whatever it still holds. The [`ProcessManager`] drives a saga by reading
//! its [`ProcessState`], calling the ticket and ticket list aggregates, and
//! folding the outcomes back in. The [`Watchdog`] aborts sagas that run past
//! their cutoff.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod events;
pub mod process_manager;
pub mod process_state;
pub mod services;
pub mod state;
pub mod watchdog;

pub use aggregate::{AllocatorCommand, TicketAllocator, Update};
pub use config::ProcessConfig;
pub use error::SagaError;
pub use events::AllocatorEvent;
pub use process_manager::{ProcessCommand, ProcessManager};
pub use process_state::{AllocationStatus, ProcessState};
pub use services::{InMemoryTicketListService, ListSync, TicketListService};
pub use state::{Allocation, AllocationStats, Phase, States};
pub use watchdog::Watchdog;
