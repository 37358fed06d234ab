//! TicketAllocator domain events.
//!
//! The variant tags and field names are the persisted wire contract.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use common::{TicketId, TicketListId};
use domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// Events that can occur on a TicketAllocator saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AllocatorEvent {
    /// A transaction started over the given tickets.
    Commenced(CommencedData),

    /// Tickets could not be reserved.
    Failed(TicketsData),

    /// Tickets were reserved by this allocator.
    Reserved(TicketsData),

    /// Reserved tickets were earmarked for a list.
    Allocated(AllocatedData),

    /// The list confirmed ownership of its earmarked tickets.
    Assigned(AssignedData),

    /// Earmarked tickets the ticket aggregate refused to allocate to the list.
    Unassigned(AllocatedData),

    /// Reserved tickets were handed back for release.
    Released(TicketsData),

    /// Tickets were confirmed no longer held by this allocator.
    Revoked(TicketsData),

    /// The caller asked to roll back.
    Cancelled,

    /// The cutoff passed and the transaction is being rolled back.
    Aborted,

    /// No work remains; the allocator is idle again.
    Completed,
}

impl DomainEvent for AllocatorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            AllocatorEvent::Commenced(_) => "Commenced",
            AllocatorEvent::Failed(_) => "Failed",
            AllocatorEvent::Reserved(_) => "Reserved",
            AllocatorEvent::Allocated(_) => "Allocated",
            AllocatorEvent::Assigned(_) => "Assigned",
            AllocatorEvent::Unassigned(_) => "Unassigned",
            AllocatorEvent::Released(_) => "Released",
            AllocatorEvent::Revoked(_) => "Revoked",
            AllocatorEvent::Cancelled => "Cancelled",
            AllocatorEvent::Aborted => "Aborted",
            AllocatorEvent::Completed => "Completed",
        }
    }
}

/// Data for the Commenced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommencedData {
    pub ticket_ids: BTreeSet<TicketId>,
    /// Absolute time after which the watchdog may abort the transaction.
    pub cutoff: DateTime<Utc>,
}

/// Data for events that carry a set of tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketsData {
    pub ticket_ids: BTreeSet<TicketId>,
}

/// Data for the Allocated and Unassigned events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocatedData {
    pub ticket_ids: BTreeSet<TicketId>,
    pub list_id: TicketListId,
}

/// Data for the Assigned event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignedData {
    pub list_id: TicketListId,
}

// Convenience constructors
impl AllocatorEvent {
    pub fn commenced(ticket_ids: BTreeSet<TicketId>, cutoff: DateTime<Utc>) -> Self {
        AllocatorEvent::Commenced(CommencedData { ticket_ids, cutoff })
    }

    pub fn failed(ticket_ids: BTreeSet<TicketId>) -> Self {
        AllocatorEvent::Failed(TicketsData { ticket_ids })
    }

    pub fn reserved(ticket_ids: BTreeSet<TicketId>) -> Self {
        AllocatorEvent::Reserved(TicketsData { ticket_ids })
    }

    pub fn allocated(ticket_ids: BTreeSet<TicketId>, list_id: TicketListId) -> Self {
        AllocatorEvent::Allocated(AllocatedData {
            ticket_ids,
            list_id,
        })
    }

    pub fn assigned(list_id: TicketListId) -> Self {
        AllocatorEvent::Assigned(AssignedData { list_id })
    }

    pub fn unassigned(ticket_ids: BTreeSet<TicketId>, list_id: TicketListId) -> Self {
        AllocatorEvent::Unassigned(AllocatedData {
            ticket_ids,
            list_id,
        })
    }

    pub fn released(ticket_ids: BTreeSet<TicketId>) -> Self {
        AllocatorEvent::Released(TicketsData { ticket_ids })
    }

    pub fn revoked(ticket_ids: BTreeSet<TicketId>) -> Self {
        AllocatorEvent::Revoked(TicketsData { ticket_ids })
    }
}
