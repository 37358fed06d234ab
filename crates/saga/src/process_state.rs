//! Actionable views derived from a TicketAllocator.

use std::collections::BTreeSet;

use common::TicketId;
use serde::{Deserialize, Serialize};

use crate::aggregate::TicketAllocator;
use crate::state::{Allocation, AllocationStats, Phase};

/// What the process manager has left to do for an allocator.
///
/// This is the only view of a saga the process manager acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// Every ticket is resolved and nothing is pending; waiting for `Apply`.
    Idle { reserved: BTreeSet<TicketId> },

    /// Reservations, assignments or releases are still outstanding.
    Running {
        reserved: BTreeSet<TicketId>,
        to_reserve: BTreeSet<TicketId>,
        to_assign: Vec<Allocation>,
        to_release: BTreeSet<TicketId>,
    },

    /// Rolling back: finish pending assignments and release everything else.
    Cancelling {
        to_assign: Vec<Allocation>,
        to_release: BTreeSet<TicketId>,
    },

    /// No transaction in flight.
    Completed,
}

impl ProcessState {
    pub fn from_phase(phase: &Phase) -> Self {
        match phase {
            Phase::Idle => ProcessState::Completed,
            Phase::Running(states)
                if states.assigning.is_empty()
                    && states.releasing.is_empty()
                    && states.unknown.is_empty() =>
            {
                ProcessState::Idle {
                    reserved: states.reserved.clone(),
                }
            }
            Phase::Running(states) => ProcessState::Running {
                reserved: states.reserved.clone(),
                to_reserve: states.unknown.clone(),
                to_assign: states.assigning.clone(),
                to_release: states.releasing.clone(),
            },
            Phase::Reverting(states) => ProcessState::Cancelling {
                to_assign: states.assigning.clone(),
                to_release: states.held(),
            },
        }
    }
}

impl From<&TicketAllocator> for ProcessState {
    fn from(allocator: &TicketAllocator) -> Self {
        ProcessState::from_phase(allocator.phase())
    }
}

/// Progress of an allocation as reported to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AllocationStatus {
    /// Reservation finished; the reserved tickets await `Apply`.
    Ready { reserved: BTreeSet<TicketId> },

    Running {
        reserved: BTreeSet<TicketId>,
        to_reserve: BTreeSet<TicketId>,
        to_assign: Vec<Allocation>,
        to_release: BTreeSet<TicketId>,
    },

    Cancelling {
        to_assign: Vec<Allocation>,
        to_release: BTreeSet<TicketId>,
    },

    /// The last transaction finished.
    Completed { stats: AllocationStats },
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Ready { .. } => "ready",
            AllocationStatus::Running { .. } => "running",
            AllocationStatus::Cancelling { .. } => "cancelling",
            AllocationStatus::Completed { .. } => "completed",
        }
    }
}

impl From<&TicketAllocator> for AllocationStatus {
    fn from(allocator: &TicketAllocator) -> Self {
        match ProcessState::from(allocator) {
            ProcessState::Idle { reserved } => AllocationStatus::Ready { reserved },
            ProcessState::Running {
                reserved,
                to_reserve,
                to_assign,
                to_release,
            } => AllocationStatus::Running {
                reserved,
                to_reserve,
                to_assign,
                to_release,
            },
            ProcessState::Cancelling {
                to_assign,
                to_release,
            } => AllocationStatus::Cancelling {
                to_assign,
                to_release,
            },
            ProcessState::Completed => AllocationStatus::Completed {
                stats: allocator.stats(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::States;
    use common::TicketListId;

    #[test]
    fn idle_phase_is_completed() {
        assert_eq!(ProcessState::from_phase(&Phase::Idle), ProcessState::Completed);
    }

    #[test]
    fn running_with_only_resolved_tickets_is_idle() {
        let [t1, t2] = std::array::from_fn(|_| TicketId::new());
        let states = States {
            reserved: BTreeSet::from([t1]),
            failed: BTreeSet::from([t2]),
            ..States::default()
        };

        assert_eq!(
            ProcessState::from_phase(&Phase::Running(states)),
            ProcessState::Idle {
                reserved: BTreeSet::from([t1])
            }
        );
    }

    #[test]
    fn running_with_pending_work() {
        let [t1, t2, t3, t4] = std::array::from_fn(|_| TicketId::new());
        let allocation = Allocation {
            ticket_ids: BTreeSet::from([t3]),
            list_id: TicketListId::new(),
        };
        let states = States {
            unknown: BTreeSet::from([t1]),
            reserved: BTreeSet::from([t2]),
            assigning: vec![allocation.clone()],
            releasing: BTreeSet::from([t4]),
            ..States::default()
        };

        assert_eq!(
            ProcessState::from_phase(&Phase::Running(states)),
            ProcessState::Running {
                reserved: BTreeSet::from([t2]),
                to_reserve: BTreeSet::from([t1]),
                to_assign: vec![allocation],
                to_release: BTreeSet::from([t4]),
            }
        );
    }

    #[test]
    fn reverting_releases_everything_unassigned() {
        let [t1, t2, t3, t4, t5] = std::array::from_fn(|_| TicketId::new());
        let allocation = Allocation {
            ticket_ids: BTreeSet::from([t3]),
            list_id: TicketListId::new(),
        };
        let states = States {
            unknown: BTreeSet::from([t1]),
            reserved: BTreeSet::from([t2]),
            assigning: vec![allocation.clone()],
            releasing: BTreeSet::from([t4]),
            failed: BTreeSet::from([t5]),
        };

        assert_eq!(
            ProcessState::from_phase(&Phase::Reverting(states)),
            ProcessState::Cancelling {
                to_assign: vec![allocation],
                to_release: BTreeSet::from([t1, t2, t4]),
            }
        );
    }

    #[test]
    fn status_serializes_with_a_status_tag() {
        let status = AllocationStatus::from(&TicketAllocator::default());
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["status"], "completed");
        assert_eq!(json["stats"]["requested"], 0);
        assert_eq!(status.as_str(), "completed");
    }
}
