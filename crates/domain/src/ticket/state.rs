//! Ticket ownership state.

use common::{AllocatorId, TicketListId};
use serde::{Deserialize, Serialize};

/// Who holds a ticket, if anyone.
///
/// State transitions:
/// ```text
/// Unallocated ──► Reserved(by) ──► Allocated(by, on)
///      ▲               │                  │
///      └───────────────┴──── Revoked ─────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TicketState {
    /// Nobody holds the ticket.
    #[default]
    Unallocated,

    /// An allocator holds the ticket but has not placed it on a list.
    Reserved { by: AllocatorId },

    /// An allocator has placed the ticket on a list.
    Allocated { by: AllocatorId, on: TicketListId },
}

impl TicketState {
    /// Returns the current owner, if any.
    pub fn owner(&self) -> Option<AllocatorId> {
        match self {
            TicketState::Unallocated => None,
            TicketState::Reserved { by } | TicketState::Allocated { by, .. } => Some(*by),
        }
    }

    /// Returns true if `owner` currently holds the ticket.
    pub fn is_held_by(&self, owner: AllocatorId) -> bool {
        self.owner() == Some(owner)
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketState::Unallocated => "Unallocated",
            TicketState::Reserved { .. } => "Reserved",
            TicketState::Allocated { .. } => "Allocated",
        }
    }
}

impl std::fmt::Display for TicketState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_is_unallocated() {
        assert_eq!(TicketState::default(), TicketState::Unallocated);
        assert_eq!(TicketState::default().owner(), None);
    }

    #[test]
    fn owner_of_reserved_and_allocated() {
        let by = AllocatorId::new();
        let on = TicketListId::new();

        assert!(TicketState::Reserved { by }.is_held_by(by));
        assert!(TicketState::Allocated { by, on }.is_held_by(by));
        assert!(!TicketState::Allocated { by, on }.is_held_by(AllocatorId::new()));
    }

    #[test]
    fn display() {
        let by = AllocatorId::new();
        assert_eq!(TicketState::Unallocated.to_string(), "Unallocated");
        assert_eq!(TicketState::Reserved { by }.to_string(), "Reserved");
        assert_eq!(
            TicketState::Allocated {
                by,
                on: TicketListId::new()
            }
            .to_string(),
            "Allocated"
        );
    }
}
