//! Ticket list service trait and in-memory implementation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use common::{AllocatorId, TicketId, TicketListId};

use crate::error::SagaError;

/// Outcome of a list sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListSync {
    /// The change was applied; carries the tickets the list now owns.
    Ok(BTreeSet<TicketId>),

    /// The list did not own the expected tickets; carries what it owns instead.
    Conflict(BTreeSet<TicketId>),
}

/// Operations the process manager needs from the ticket list aggregate.
#[async_trait]
pub trait TicketListService: Send + Sync {
    /// Releases `to_release` and acquires `to_acquire` on behalf of `transaction_id`,
    /// provided the list currently owns exactly `tickets`.
    async fn sync(
        &self,
        list_id: TicketListId,
        transaction_id: AllocatorId,
        tickets: &BTreeSet<TicketId>,
        to_release: &BTreeSet<TicketId>,
        to_acquire: &BTreeSet<TicketId>,
    ) -> Result<ListSync, SagaError>;

    /// Returns the tickets a list currently owns.
    async fn owned(&self, list_id: TicketListId) -> Result<BTreeSet<TicketId>, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryTicketListState {
    lists: HashMap<TicketListId, BTreeSet<TicketId>>,
    interference: usize,
    unavailable: bool,
}

/// In-memory ticket list service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTicketListService {
    state: Arc<RwLock<InMemoryTicketListState>>,
}

impl InMemoryTicketListService {
    /// Creates a new in-memory ticket list service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `syncs` calls race a concurrent writer that adds a
    /// foreign ticket to the list just before the expectation is checked.
    pub fn set_interference(&self, syncs: usize) {
        self.write().interference = syncs;
    }

    /// Configures the service to fail every call.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.write().unavailable = unavailable;
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryTicketListState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryTicketListState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TicketListService for InMemoryTicketListService {
    async fn sync(
        &self,
        list_id: TicketListId,
        transaction_id: AllocatorId,
        tickets: &BTreeSet<TicketId>,
        to_release: &BTreeSet<TicketId>,
        to_acquire: &BTreeSet<TicketId>,
    ) -> Result<ListSync, SagaError> {
        let mut state = self.write();
        if state.unavailable {
            return Err(SagaError::TicketList(format!("list {list_id} unavailable")));
        }

        let interfere = state.interference > 0;
        if interfere {
            state.interference -= 1;
        }

        let owned = state.lists.entry(list_id).or_default();
        if interfere {
            owned.insert(TicketId::new());
        }

        if *owned != *tickets {
            return Ok(ListSync::Conflict(owned.clone()));
        }

        owned.retain(|t| !to_release.contains(t));
        owned.extend(to_acquire.iter().copied());
        tracing::debug!(
            %list_id,
            %transaction_id,
            released = to_release.len(),
            acquired = to_acquire.len(),
            "ticket list synced"
        );
        Ok(ListSync::Ok(owned.clone()))
    }

    async fn owned(&self, list_id: TicketListId) -> Result<BTreeSet<TicketId>, SagaError> {
        let state = self.read();
        if state.unavailable {
            return Err(SagaError::TicketList(format!("list {list_id} unavailable")));
        }
        Ok(state.lists.get(&list_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sync_acquires_and_releases() {
        let service = InMemoryTicketListService::new();
        let list = TicketListId::new();
        let tx = AllocatorId::new();
        let [t1, t2] = std::array::from_fn(|_| TicketId::new());

        let outcome = service
            .sync(list, tx, &BTreeSet::new(), &BTreeSet::new(), &BTreeSet::from([t1, t2]))
            .await
            .unwrap();
        assert_eq!(outcome, ListSync::Ok(BTreeSet::from([t1, t2])));

        let outcome = service
            .sync(
                list,
                tx,
                &BTreeSet::from([t1, t2]),
                &BTreeSet::from([t1]),
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ListSync::Ok(BTreeSet::from([t2])));
        assert_eq!(service.owned(list).await.unwrap(), BTreeSet::from([t2]));
    }

    #[tokio::test]
    async fn stale_expectation_conflicts_without_changes() {
        let service = InMemoryTicketListService::new();
        let list = TicketListId::new();
        let t1 = TicketId::new();

        let outcome = service
            .sync(
                list,
                AllocatorId::new(),
                &BTreeSet::from([t1]),
                &BTreeSet::new(),
                &BTreeSet::from([TicketId::new()]),
            )
            .await
            .unwrap();

        assert_eq!(outcome, ListSync::Conflict(BTreeSet::new()));
        assert!(service.owned(list).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn interference_changes_the_list_under_the_caller() {
        let service = InMemoryTicketListService::new();
        let list = TicketListId::new();
        service.set_interference(1);

        let ListSync::Conflict(current) = service
            .sync(
                list,
                AllocatorId::new(),
                &BTreeSet::new(),
                &BTreeSet::new(),
                &BTreeSet::new(),
            )
            .await
            .unwrap()
        else {
            panic!("expected a conflict");
        };
        assert_eq!(current.len(), 1);

        let outcome = service
            .sync(list, AllocatorId::new(), &current, &BTreeSet::new(), &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(outcome, ListSync::Ok(current));
    }

    #[tokio::test]
    async fn unavailable_service_fails() {
        let service = InMemoryTicketListService::new();
        service.set_unavailable(true);

        let result = service.owned(TicketListId::new()).await;
        assert!(matches!(result, Err(SagaError::TicketList(_))));
    }
}
