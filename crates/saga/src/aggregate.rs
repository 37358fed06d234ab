//! TicketAllocator saga aggregate.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use common::{TicketId, TicketListId};
use domain::{Accumulator, Aggregate, DomainEvent};
use event_store::Version;

use crate::error::SagaError;
use crate::events::AllocatorEvent;
use crate::state::{Allocation, AllocationStats, Phase, States};

/// Requests that drive an allocator through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorCommand {
    /// Start a transaction over `ticket_ids` that may be aborted after `timeout`.
    Commence {
        ticket_ids: BTreeSet<TicketId>,
        timeout: Duration,
    },

    /// Earmark reserved tickets for lists and hand the rest back.
    Apply {
        assign: Vec<Allocation>,
        release: BTreeSet<TicketId>,
    },

    /// Roll back at the caller's request.
    Cancel,

    /// Roll back because the cutoff passed.
    Abort,
}

impl AllocatorCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocatorCommand::Commence { .. } => "Commence",
            AllocatorCommand::Apply { .. } => "Apply",
            AllocatorCommand::Cancel => "Cancel",
            AllocatorCommand::Abort => "Abort",
        }
    }
}

/// Facts about external progress, reported back by the process manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Failed(BTreeSet<TicketId>),
    Reserved(BTreeSet<TicketId>),
    Assigned(TicketListId),
    /// Earmarked tickets the ticket aggregate would not allocate to the list.
    Unassigned(Allocation),
    Revoked(BTreeSet<TicketId>),
}

/// A saga tracking one allocation transaction across many tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketAllocator {
    version: Version,
    phase: Phase,
    cutoff: Option<DateTime<Utc>>,
    stats: AllocationStats,
}

impl TicketAllocator {
    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Cutoff of the current or most recent transaction.
    pub fn cutoff(&self) -> Option<DateTime<Utc>> {
        self.cutoff
    }

    pub fn stats(&self) -> AllocationStats {
        self.stats
    }

    /// Tickets among `ticket_ids` that the current transaction no longer accounts for.
    ///
    /// A reservation that lands after the saga reverted past it (or completed)
    /// shows up here and must be revoked by the caller.
    pub fn untracked(&self, ticket_ids: &BTreeSet<TicketId>) -> BTreeSet<TicketId> {
        match self.phase.states() {
            Some(states) => ticket_ids
                .iter()
                .filter(|id| !states.tracks(id))
                .copied()
                .collect(),
            None => ticket_ids.clone(),
        }
    }

    /// Returns true if the allocator is still running past its cutoff.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.phase.is_running() && self.cutoff.is_some_and(|cutoff| cutoff <= now)
    }

    /// Folds `updates` and then `command` into a single batch of events.
    ///
    /// Updates are filtered against the state they land on, so stale or
    /// repeated facts produce nothing. The returned flag tells whether the
    /// command was accepted (always true without one). `Completed` is appended
    /// as soon as nothing is left pending.
    pub fn decide(
        &self,
        now: DateTime<Utc>,
        updates: &[Update],
        command: Option<&AllocatorCommand>,
    ) -> Result<(bool, Vec<AllocatorEvent>), SagaError> {
        let mut acc = Accumulator::new(self.clone());

        for update in updates {
            acc.transact(|allocator| ((), allocator.decide_update(update)))?;
        }

        let accepted = match command {
            Some(command) => acc.transact(|allocator| allocator.decide_command(now, command))?,
            None => true,
        };

        acc.transact(|allocator| ((), allocator.decide_completion()))?;

        let (_, events) = acc.into_parts();
        Ok((accepted, events))
    }

    fn decide_update(&self, update: &Update) -> Vec<AllocatorEvent> {
        let Some(states) = self.phase.states() else {
            return vec![];
        };

        match update {
            Update::Failed(ids) => within(ids, &states.unknown)
                .map(AllocatorEvent::failed)
                .into_iter()
                .collect(),
            Update::Reserved(ids) => within(ids, &states.unknown)
                .map(AllocatorEvent::reserved)
                .into_iter()
                .collect(),
            Update::Assigned(list_id) if states.is_assigning_to(*list_id) => {
                vec![AllocatorEvent::assigned(*list_id)]
            }
            Update::Assigned(_) => vec![],
            Update::Unassigned(allocation) => {
                let earmarked: BTreeSet<TicketId> = states
                    .assigning
                    .iter()
                    .filter(|a| a.list_id == allocation.list_id)
                    .flat_map(|a| a.ticket_ids.iter().copied())
                    .collect();
                within(&allocation.ticket_ids, &earmarked)
                    .map(|ids| AllocatorEvent::unassigned(ids, allocation.list_id))
                    .into_iter()
                    .collect()
            }
            Update::Revoked(ids) => within(ids, &states.held())
                .map(AllocatorEvent::revoked)
                .into_iter()
                .collect(),
        }
    }

    fn decide_command(
        &self,
        now: DateTime<Utc>,
        command: &AllocatorCommand,
    ) -> (bool, Vec<AllocatorEvent>) {
        match (command, &self.phase) {
            (AllocatorCommand::Commence { ticket_ids, timeout }, Phase::Idle) => (
                true,
                vec![AllocatorEvent::commenced(ticket_ids.clone(), now + *timeout)],
            ),
            (AllocatorCommand::Commence { .. }, _) => (false, vec![]),

            (AllocatorCommand::Apply { assign, release }, Phase::Running(states)) => {
                let mut available = states.reserved.clone();
                let mut events = Vec::new();

                for allocation in assign {
                    if let Some(ids) = within(&allocation.ticket_ids, &available) {
                        available.retain(|t| !ids.contains(t));
                        events.push(AllocatorEvent::allocated(ids, allocation.list_id));
                    }
                }
                if let Some(ids) = within(release, &available) {
                    events.push(AllocatorEvent::released(ids));
                }
                (true, events)
            }
            (AllocatorCommand::Apply { .. }, _) => (false, vec![]),

            (AllocatorCommand::Cancel, Phase::Running(_)) => {
                (true, vec![AllocatorEvent::Cancelled])
            }
            (AllocatorCommand::Abort, Phase::Running(_)) => (true, vec![AllocatorEvent::Aborted]),
            (AllocatorCommand::Cancel | AllocatorCommand::Abort, Phase::Reverting(_)) => {
                (true, vec![])
            }
            (AllocatorCommand::Cancel | AllocatorCommand::Abort, Phase::Idle) => (false, vec![]),
        }
    }

    fn decide_completion(&self) -> Vec<AllocatorEvent> {
        match self.phase.states() {
            Some(states) if states.is_settled() => vec![AllocatorEvent::Completed],
            _ => vec![],
        }
    }
}

/// The part of `ids` contained in `set`, or None if that part is empty.
fn within(ids: &BTreeSet<TicketId>, set: &BTreeSet<TicketId>) -> Option<BTreeSet<TicketId>> {
    let ids: BTreeSet<TicketId> = ids.intersection(set).copied().collect();
    (!ids.is_empty()).then_some(ids)
}

impl Aggregate for TicketAllocator {
    type Event = AllocatorEvent;
    type Error = SagaError;

    fn aggregate_type() -> &'static str {
        "TicketAllocator"
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            AllocatorEvent::Commenced(data) => {
                self.stats = AllocationStats {
                    requested: data.ticket_ids.len(),
                    ..AllocationStats::default()
                };
                self.cutoff = Some(data.cutoff);
                self.phase = Phase::Running(States::commenced(data.ticket_ids));
            }
            AllocatorEvent::Cancelled | AllocatorEvent::Aborted => {
                self.phase = match std::mem::take(&mut self.phase) {
                    Phase::Running(states) => Phase::Reverting(states),
                    other => other,
                };
            }
            AllocatorEvent::Completed => self.phase = Phase::Idle,
            other => {
                if let Some(states) = self.phase.states_mut() {
                    apply_to_states(states, &mut self.stats, other);
                }
            }
        }
    }

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        let legal = match event {
            AllocatorEvent::Commenced(_) => self.phase.is_idle(),
            AllocatorEvent::Cancelled | AllocatorEvent::Aborted => self.phase.is_running(),
            AllocatorEvent::Completed => self.phase.states().is_some_and(States::is_settled),
            _ => !self.phase.is_idle(),
        };

        if legal {
            Ok(())
        } else {
            Err(SagaError::IllegalTransition {
                event: event.event_type(),
                phase: self.phase.as_str(),
            })
        }
    }
}

fn apply_to_states(states: &mut States, stats: &mut AllocationStats, event: AllocatorEvent) {
    match event {
        AllocatorEvent::Failed(data) => {
            for id in data.ticket_ids {
                if states.unknown.remove(&id) {
                    states.failed.insert(id);
                    stats.failed += 1;
                }
            }
        }
        AllocatorEvent::Reserved(data) => {
            for id in data.ticket_ids {
                if states.unknown.remove(&id) {
                    states.reserved.insert(id);
                    stats.reserved += 1;
                }
            }
        }
        AllocatorEvent::Allocated(data) => {
            states.reserved.retain(|t| !data.ticket_ids.contains(t));
            states.assigning.push(Allocation {
                ticket_ids: data.ticket_ids,
                list_id: data.list_id,
            });
        }
        AllocatorEvent::Assigned(data) => {
            states.assigning.retain(|allocation| {
                if allocation.list_id == data.list_id {
                    stats.assigned += allocation.ticket_ids.len();
                    false
                } else {
                    true
                }
            });
        }
        AllocatorEvent::Unassigned(data) => {
            for allocation in states
                .assigning
                .iter_mut()
                .filter(|a| a.list_id == data.list_id)
            {
                let before = allocation.ticket_ids.len();
                allocation.ticket_ids.retain(|t| !data.ticket_ids.contains(t));
                stats.failed += before - allocation.ticket_ids.len();
            }
            states.assigning.retain(|a| !a.ticket_ids.is_empty());
        }
        AllocatorEvent::Released(data) => {
            for id in data.ticket_ids {
                if states.reserved.remove(&id) {
                    states.releasing.insert(id);
                }
            }
        }
        AllocatorEvent::Revoked(data) => {
            for id in data.ticket_ids {
                let held = states.unknown.remove(&id)
                    | states.reserved.remove(&id)
                    | states.releasing.remove(&id);
                if held {
                    stats.revoked += 1;
                }
            }
        }
        AllocatorEvent::Commenced(_)
        | AllocatorEvent::Cancelled
        | AllocatorEvent::Aborted
        | AllocatorEvent::Completed => {}
    }
}
