//! Ticket aggregate: per-ticket ownership decisions.

mod aggregate;
mod events;
mod service;
mod state;

pub use aggregate::{Ticket, TicketIntent};
pub use events::{TicketAllocatedData, TicketEvent, TicketReservedData};
pub use service::TicketService;
pub use state::TicketState;
