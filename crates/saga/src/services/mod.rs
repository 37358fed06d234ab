//! External collaborators consumed by the process manager.

pub mod ticket_list;

pub use ticket_list::{InMemoryTicketListService, ListSync, TicketListService};
