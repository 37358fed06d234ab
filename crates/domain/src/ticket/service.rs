//! Command-side entry point for ticket decisions.

use common::{AllocatorId, TicketId};
use event_store::EventStore;

use super::aggregate::{Ticket, TicketIntent};
use crate::command::CommandHandler;
use crate::error::DomainError;

/// Runs ticket decisions against the event store with conflict retry.
pub struct TicketService<S: EventStore> {
    handler: CommandHandler<S, Ticket>,
}

impl<S: EventStore> TicketService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    /// Overrides the optimistic concurrency attempt budget.
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.handler = self.handler.with_max_attempts(max_attempts);
        self
    }

    /// Asks for `intent` on behalf of `owner`; returns whether it was accepted.
    #[tracing::instrument(skip(self), fields(intent = intent.as_str()))]
    pub async fn sync(
        &self,
        ticket_id: TicketId,
        owner: AllocatorId,
        intent: TicketIntent,
    ) -> Result<bool, DomainError> {
        let result = self
            .handler
            .transact::<_, DomainError, _>(ticket_id, |ticket| Ok(ticket.decide(owner, intent)))
            .await?;

        if !result.outcome {
            tracing::debug!(state = %result.aggregate.state(), "ticket request rejected");
        }
        Ok(result.outcome)
    }

    /// Loads the current state of a ticket.
    pub async fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket, DomainError> {
        self.handler.load(ticket_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticket::TicketState;
    use common::TicketListId;
    use event_store::{EventStore, InMemoryEventStore};

    #[tokio::test]
    async fn sync_persists_only_state_changes() {
        let store = InMemoryEventStore::new();
        let service = TicketService::new(store.clone());
        let ticket = TicketId::new();
        let owner = AllocatorId::new();

        assert!(service.sync(ticket, owner, TicketIntent::Reserve).await.unwrap());
        assert!(service.sync(ticket, owner, TicketIntent::Reserve).await.unwrap());
        assert_eq!(
            store.get_aggregate_version(ticket.into()).await.unwrap(),
            Some(event_store::Version::first())
        );
    }

    #[tokio::test]
    async fn second_owner_is_rejected_until_revoked() {
        let service = TicketService::new(InMemoryEventStore::new());
        let ticket = TicketId::new();
        let a = AllocatorId::new();
        let b = AllocatorId::new();
        let list = TicketListId::new();

        assert!(service.sync(ticket, a, TicketIntent::Reserve).await.unwrap());
        assert!(!service.sync(ticket, b, TicketIntent::Reserve).await.unwrap());
        assert!(service.sync(ticket, a, TicketIntent::Allocate(list)).await.unwrap());

        // b's revoke is accepted but does not touch a's allocation.
        assert!(service.sync(ticket, b, TicketIntent::Revoke).await.unwrap());
        assert_eq!(
            service.get_ticket(ticket).await.unwrap().state(),
            TicketState::Allocated { by: a, on: list }
        );

        assert!(service.sync(ticket, a, TicketIntent::Revoke).await.unwrap());
        assert!(service.sync(ticket, b, TicketIntent::Reserve).await.unwrap());
        assert_eq!(
            service.get_ticket(ticket).await.unwrap().state(),
            TicketState::Reserved { by: b }
        );
    }

    #[tokio::test]
    async fn concurrent_reservations_have_one_winner() {
        let store = InMemoryEventStore::new();
        let ticket = TicketId::new();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = TicketService::new(store.clone()).with_max_attempts(8);
                tokio::spawn(async move {
                    service
                        .sync(ticket, AllocatorId::new(), TicketIntent::Reserve)
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
