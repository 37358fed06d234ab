//! Ticket aggregate and its ownership decision.

use std::convert::Infallible;

use common::{AllocatorId, TicketListId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use super::events::TicketEvent;
use super::state::TicketState;
use crate::aggregate::{Aggregate, LoadStrategy};

/// What an allocator wants to happen to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TicketIntent {
    /// Take hold of an unheld ticket.
    Reserve,

    /// Place a ticket already held by the requester on a list.
    Allocate(TicketListId),

    /// Ensure the requester no longer holds the ticket.
    Revoke,
}

impl TicketIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketIntent::Reserve => "Reserve",
            TicketIntent::Allocate(_) => "Allocate",
            TicketIntent::Revoke => "Revoke",
        }
    }
}

/// A single ticket's ownership, rebuilt from its latest event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ticket {
    version: Version,
    state: TicketState,
}

impl Ticket {
    /// Returns the current ownership state.
    pub fn state(&self) -> TicketState {
        self.state
    }

    /// Decides the outcome of `owner` requesting `intent`.
    ///
    /// Returns whether the request is satisfied together with the events
    /// needed to get there. Repeating an accepted request yields no events.
    /// A revoke by a non-owner is accepted but leaves the holder untouched.
    pub fn decide(&self, owner: AllocatorId, intent: TicketIntent) -> (bool, Vec<TicketEvent>) {
        use TicketState::*;

        match (intent, self.state) {
            (TicketIntent::Reserve, Unallocated) => (true, vec![TicketEvent::reserved(owner)]),
            (TicketIntent::Reserve, Reserved { by }) if by == owner => (true, vec![]),
            (TicketIntent::Reserve, _) => (false, vec![]),

            (TicketIntent::Allocate(list), Reserved { by }) if by == owner => {
                (true, vec![TicketEvent::allocated(owner, list)])
            }
            (TicketIntent::Allocate(list), Allocated { by, on }) if by == owner && on == list => {
                (true, vec![])
            }
            (TicketIntent::Allocate(_), _) => (false, vec![]),

            (TicketIntent::Revoke, state) if state.is_held_by(owner) => {
                (true, vec![TicketEvent::Revoked])
            }
            (TicketIntent::Revoke, _) => (true, vec![]),
        }
    }
}

impl Aggregate for Ticket {
    type Event = TicketEvent;
    type Error = Infallible;

    fn aggregate_type() -> &'static str {
        "Ticket"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        self.state = match event {
            TicketEvent::Reserved(data) => TicketState::Reserved { by: data.by },
            TicketEvent::Allocated(data) => TicketState::Allocated {
                by: data.by,
                on: data.on,
            },
            TicketEvent::Revoked => TicketState::Unallocated,
        };
    }

    fn load_strategy() -> LoadStrategy {
        LoadStrategy::LatestEvent
    }
}
