//! Ticket domain events.

use common::{AllocatorId, TicketListId};
use serde::{Deserialize, Serialize};

use crate::aggregate::DomainEvent;

/// Events that can occur on a ticket aggregate.
///
/// Every event fully describes the resulting ownership, so the latest event
/// alone determines the state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TicketEvent {
    /// An allocator took hold of the ticket.
    Reserved(TicketReservedData),

    /// The holding allocator placed the ticket on a list.
    Allocated(TicketAllocatedData),

    /// The holder let go of the ticket.
    Revoked,
}

impl DomainEvent for TicketEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TicketEvent::Reserved(_) => "Reserved",
            TicketEvent::Allocated(_) => "Allocated",
            TicketEvent::Revoked => "Revoked",
        }
    }
}

/// Data for the Reserved event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketReservedData {
    pub by: AllocatorId,
}

/// Data for the Allocated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketAllocatedData {
    pub by: AllocatorId,
    pub on: TicketListId,
}

impl TicketEvent {
    /// Creates a Reserved event.
    pub fn reserved(by: AllocatorId) -> Self {
        TicketEvent::Reserved(TicketReservedData { by })
    }

    /// Creates an Allocated event.
    pub fn allocated(by: AllocatorId, on: TicketListId) -> Self {
        TicketEvent::Allocated(TicketAllocatedData { by, on })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_types_are_variant_tags() {
        let by = AllocatorId::new();
        assert_eq!(TicketEvent::reserved(by).event_type(), "Reserved");
        assert_eq!(
            TicketEvent::allocated(by, TicketListId::new()).event_type(),
            "Allocated"
        );
        assert_eq!(TicketEvent::Revoked.event_type(), "Revoked");
    }

    #[test]
    fn wire_format_is_tagged() {
        let by = AllocatorId::new();
        let on = TicketListId::new();

        let json = serde_json::to_value(TicketEvent::allocated(by, on)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "Allocated",
                "data": { "by": by.to_string(), "on": on.to_string() }
            })
        );

        let revoked = serde_json::to_value(TicketEvent::Revoked).unwrap();
        assert_eq!(revoked, serde_json::json!({ "type": "Revoked" }));
        let back: TicketEvent = serde_json::from_value(revoked).unwrap();
        assert_eq!(back, TicketEvent::Revoked);
    }
}
