//! TicketAllocator fold state.

use std::collections::BTreeSet;

use common::{TicketId, TicketListId};
use serde::{Deserialize, Serialize};

/// Tickets earmarked for a list but not yet confirmed by it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub ticket_ids: BTreeSet<TicketId>,
    pub list_id: TicketListId,
}

/// Per-ticket bookkeeping of an in-flight transaction.
///
/// `unknown`, `failed` and `reserved` are pairwise disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct States {
    /// Tickets whose reservation outcome is not known yet.
    pub unknown: BTreeSet<TicketId>,
    /// Tickets that could not be reserved.
    pub failed: BTreeSet<TicketId>,
    /// Tickets held by this allocator and not yet earmarked.
    pub reserved: BTreeSet<TicketId>,
    /// Pending assignments, in the order they were requested.
    pub assigning: Vec<Allocation>,
    /// Tickets that still need to be revoked.
    pub releasing: BTreeSet<TicketId>,
}

impl States {
    /// Starts tracking a fresh transaction over `tickets`.
    pub fn commenced(tickets: BTreeSet<TicketId>) -> Self {
        Self {
            unknown: tickets,
            ..Self::default()
        }
    }

    /// Returns true once nothing is left to reserve, assign or release.
    pub fn is_settled(&self) -> bool {
        self.unknown.is_empty()
            && self.reserved.is_empty()
            && self.assigning.is_empty()
            && self.releasing.is_empty()
    }

    /// Returns true if a pending assignment targets `list_id`.
    pub fn is_assigning_to(&self, list_id: TicketListId) -> bool {
        self.assigning.iter().any(|a| a.list_id == list_id)
    }

    /// Tickets this allocator may still hold and has not handed to a list.
    pub fn held(&self) -> BTreeSet<TicketId> {
        self.unknown
            .iter()
            .chain(&self.reserved)
            .chain(&self.releasing)
            .copied()
            .collect()
    }

    /// Returns true if `ticket_id` is still part of the transaction's bookkeeping.
    pub fn tracks(&self, ticket_id: &TicketId) -> bool {
        self.unknown.contains(ticket_id)
            || self.reserved.contains(ticket_id)
            || self.releasing.contains(ticket_id)
            || self.assigning.iter().any(|a| a.ticket_ids.contains(ticket_id))
    }
}

/// Lifecycle phase of a TicketAllocator.
///
/// State transitions:
/// ```text
/// Idle ──► Running ──► Reverting
///  ▲          │            │
///  └──────────┴────────────┘  (Completed)
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Phase {
    /// No transaction in flight.
    #[default]
    Idle,

    /// Reserving and assigning tickets.
    Running(States),

    /// Rolling back: releasing everything not yet assigned.
    Reverting(States),
}

impl Phase {
    pub fn states(&self) -> Option<&States> {
        match self {
            Phase::Idle => None,
            Phase::Running(states) | Phase::Reverting(states) => Some(states),
        }
    }

    pub fn states_mut(&mut self) -> Option<&mut States> {
        match self {
            Phase::Idle => None,
            Phase::Running(states) | Phase::Reverting(states) => Some(states),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Phase::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Phase::Running(_))
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::Running(_) => "Running",
            Phase::Reverting(_) => "Reverting",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Counters for the most recent transaction, reset when one commences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationStats {
    pub requested: usize,
    pub reserved: usize,
    pub failed: usize,
    pub assigned: usize,
    pub revoked: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settled_requires_every_pending_set_to_be_empty() {
        let ticket = TicketId::new();
        let mut states = States::commenced(BTreeSet::from([ticket]));
        assert!(!states.is_settled());

        states.unknown.clear();
        states.failed.insert(ticket);
        assert!(states.is_settled());

        states.assigning.push(Allocation {
            ticket_ids: BTreeSet::new(),
            list_id: TicketListId::new(),
        });
        assert!(!states.is_settled());
    }

    #[test]
    fn held_excludes_failed_and_assigning() {
        let [a, b, c, d, e] = std::array::from_fn(|_| TicketId::new());
        let states = States {
            unknown: BTreeSet::from([a]),
            failed: BTreeSet::from([b]),
            reserved: BTreeSet::from([c]),
            assigning: vec![Allocation {
                ticket_ids: BTreeSet::from([d]),
                list_id: TicketListId::new(),
            }],
            releasing: BTreeSet::from([e]),
        };

        assert_eq!(states.held(), BTreeSet::from([a, c, e]));
    }

    #[test]
    fn phase_display() {
        assert_eq!(Phase::default().to_string(), "Idle");
        assert_eq!(Phase::Running(States::default()).to_string(), "Running");
        assert_eq!(Phase::Reverting(States::default()).to_string(), "Reverting");
    }
}
