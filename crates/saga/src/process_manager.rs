//! Process manager that drives TicketAllocator sagas to completion.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use common::{AllocatorId, TicketId, TicketListId};
use domain::{CommandHandler, CommandResult, TicketIntent, TicketService};
use event_store::{EventStore, EventStoreExt};
use futures_util::future::join_all;
use tokio::sync::Semaphore;

use crate::aggregate::{AllocatorCommand, TicketAllocator, Update};
use crate::config::ProcessConfig;
use crate::error::SagaError;
use crate::events::AllocatorEvent;
use crate::process_state::{AllocationStatus, ProcessState};
use crate::services::{ListSync, TicketListService};
use crate::state::Allocation;

/// Requests accepted by [`ProcessManager::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessCommand {
    /// Resume outstanding work.
    Continue,

    /// Earmark reserved tickets for lists and release the rest.
    Apply {
        assign: Vec<Allocation>,
        release: BTreeSet<TicketId>,
    },

    /// Roll back at the caller's request.
    Cancel,

    /// Roll back because the cutoff passed.
    Abort,
}

impl ProcessCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessCommand::Continue => "Continue",
            ProcessCommand::Apply { .. } => "Apply",
            ProcessCommand::Cancel => "Cancel",
            ProcessCommand::Abort => "Abort",
        }
    }
}

type TicketOutcome = (TicketId, TicketIntent, Result<bool, SagaError>);

/// Orchestrates allocation transactions.
///
/// Each round reads the [`ProcessState`] of an allocator, issues the ticket
/// and list calls it asks for, and folds their outcomes back into the saga in
/// a single append. Rounds repeat until nothing actionable is left.
pub struct ProcessManager<S, L>
where
    S: EventStore,
    L: TicketListService,
{
    allocators: CommandHandler<S, TicketAllocator>,
    tickets: TicketService<S>,
    lists: L,
    config: ProcessConfig,
    permits: Arc<Semaphore>,
}

impl<S, L> ProcessManager<S, L>
where
    S: EventStore + Clone,
    L: TicketListService,
{
    /// Creates a new process manager.
    pub fn new(store: S, lists: L, config: ProcessConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            allocators: CommandHandler::new(store.clone()),
            tickets: TicketService::new(store),
            lists,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.config
    }

    pub fn tickets(&self) -> &TicketService<S> {
        &self.tickets
    }

    pub fn lists(&self) -> &L {
        &self.lists
    }

    /// Commences a transaction over `tickets` and works it as far as possible.
    #[tracing::instrument(skip(self, tickets), fields(tickets = tickets.len()))]
    pub async fn start(
        &self,
        allocator_id: AllocatorId,
        timeout: Duration,
        tickets: BTreeSet<TicketId>,
    ) -> Result<AllocationStatus, SagaError> {
        let command = AllocatorCommand::Commence {
            ticket_ids: tickets,
            timeout,
        };
        let result = self
            .allocators
            .transact::<_, SagaError, _>(allocator_id, |allocator| {
                allocator.decide(Utc::now(), &[], Some(&command))
            })
            .await?;

        if !result.outcome {
            return Err(SagaError::AlreadyStarted(allocator_id));
        }

        metrics::counter!("allocator_started_total").increment(1);
        tracing::info!(cutoff = ?result.aggregate.cutoff(), "allocator commenced");
        self.observe(&result.events);

        self.drive(allocator_id).await
    }

    /// Applies `command` to an in-flight transaction and works it as far as possible.
    #[tracing::instrument(skip(self, command), fields(command = command.as_str()))]
    pub async fn execute(
        &self,
        allocator_id: AllocatorId,
        command: ProcessCommand,
    ) -> Result<AllocationStatus, SagaError> {
        if self.allocator(allocator_id).await?.is_none() {
            return Err(SagaError::NotFound(allocator_id));
        }

        let command = match command {
            ProcessCommand::Continue => None,
            ProcessCommand::Apply { assign, release } => {
                Some(AllocatorCommand::Apply { assign, release })
            }
            ProcessCommand::Cancel => Some(AllocatorCommand::Cancel),
            ProcessCommand::Abort => Some(AllocatorCommand::Abort),
        };

        if let Some(command) = command {
            self.command(allocator_id, command).await?;
        }

        self.drive(allocator_id).await
    }

    /// Returns the current progress of an allocator without doing any work.
    pub async fn status(&self, allocator_id: AllocatorId) -> Result<AllocationStatus, SagaError> {
        let allocator = self
            .allocator(allocator_id)
            .await?
            .ok_or(SagaError::NotFound(allocator_id))?;
        Ok(AllocationStatus::from(&allocator))
    }

    /// Loads an allocator, or None if it was never started.
    pub async fn allocator(
        &self,
        allocator_id: AllocatorId,
    ) -> Result<Option<TicketAllocator>, SagaError> {
        Ok(self.allocators.load_existing(allocator_id).await?)
    }

    /// Lists every allocator that has ever commenced a transaction.
    pub async fn allocator_ids(&self) -> Result<Vec<AllocatorId>, SagaError> {
        let ids = self
            .allocators
            .store()
            .aggregates_with_event(
                <TicketAllocator as domain::Aggregate>::aggregate_type(),
                "Commenced",
            )
            .await?;
        Ok(ids
            .into_iter()
            .map(|id| AllocatorId::from_uuid(id.as_uuid()))
            .collect())
    }

    async fn command(
        &self,
        allocator_id: AllocatorId,
        command: AllocatorCommand,
    ) -> Result<(), SagaError> {
        let result = self
            .allocators
            .transact::<_, SagaError, _>(allocator_id, |allocator| {
                allocator.decide(Utc::now(), &[], Some(&command))
            })
            .await?;

        if !result.outcome {
            return Err(SagaError::CommandRejected {
                command: command.as_str(),
                phase: result.aggregate.phase().as_str(),
            });
        }

        self.observe(&result.events);
        Ok(())
    }

    /// Runs work rounds until the allocator has nothing actionable left.
    async fn drive(&self, allocator_id: AllocatorId) -> Result<AllocationStatus, SagaError> {
        for round in 1..=self.config.max_rounds {
            let allocator = self.allocators.load(allocator_id).await?;

            let (to_reserve, to_assign, to_release) = match ProcessState::from(&allocator) {
                ProcessState::Idle { .. } | ProcessState::Completed => {
                    return Ok(AllocationStatus::from(&allocator));
                }
                ProcessState::Running {
                    to_reserve,
                    to_assign,
                    to_release,
                    ..
                } => (to_reserve, to_assign, to_release),
                ProcessState::Cancelling {
                    to_assign,
                    to_release,
                } => (BTreeSet::new(), to_assign, to_release),
            };

            let started = Instant::now();
            let updates = self
                .work(allocator_id, to_reserve, to_assign, to_release)
                .await;
            metrics::histogram!("allocator_step_duration_seconds")
                .record(started.elapsed().as_secs_f64());

            if updates.is_empty() {
                tracing::debug!(round, "no progress this round");
                return Ok(AllocationStatus::from(&allocator));
            }

            let result = self.fold(allocator_id, &updates).await?;
            if result.events.is_empty() {
                return Ok(AllocationStatus::from(&result.aggregate));
            }
        }

        tracing::warn!(
            rounds = self.config.max_rounds,
            "round budget spent with work outstanding"
        );
        self.status(allocator_id).await
    }

    /// Issues one round of ticket and list calls and reports what changed.
    async fn work(
        &self,
        allocator_id: AllocatorId,
        to_reserve: BTreeSet<TicketId>,
        to_assign: Vec<Allocation>,
        to_release: BTreeSet<TicketId>,
    ) -> Vec<Update> {
        let mut calls: Vec<(TicketId, TicketIntent)> = Vec::new();
        calls.extend(to_reserve.iter().map(|t| (*t, TicketIntent::Reserve)));
        calls.extend(to_release.iter().map(|t| (*t, TicketIntent::Revoke)));
        for allocation in &to_assign {
            let intent = TicketIntent::Allocate(allocation.list_id);
            calls.extend(allocation.ticket_ids.iter().map(|t| (*t, intent)));
        }

        let mut reserved = BTreeSet::new();
        let mut failed = BTreeSet::new();
        let mut revoked = BTreeSet::new();
        let mut allocated: BTreeMap<TicketListId, BTreeSet<TicketId>> = BTreeMap::new();
        let mut refused: BTreeMap<TicketListId, BTreeSet<TicketId>> = BTreeMap::new();
        let mut unsettled: BTreeSet<TicketListId> = BTreeSet::new();

        for (ticket_id, intent, outcome) in self.sync_tickets(allocator_id, calls).await {
            match (intent, outcome) {
                (_, Err(e)) => {
                    tracing::warn!(%ticket_id, intent = intent.as_str(), error = %e, "ticket call failed");
                    if let TicketIntent::Allocate(list_id) = intent {
                        unsettled.insert(list_id);
                    }
                }
                (TicketIntent::Reserve, Ok(true)) => {
                    reserved.insert(ticket_id);
                }
                (TicketIntent::Reserve, Ok(false)) => {
                    tracing::warn!(%ticket_id, "reservation rejected");
                    failed.insert(ticket_id);
                }
                (TicketIntent::Revoke, Ok(_)) => {
                    revoked.insert(ticket_id);
                }
                (TicketIntent::Allocate(list_id), Ok(true)) => {
                    allocated.entry(list_id).or_default().insert(ticket_id);
                }
                (TicketIntent::Allocate(list_id), Ok(false)) => {
                    tracing::warn!(%ticket_id, %list_id, "ticket no longer held, not allocated");
                    refused.entry(list_id).or_default().insert(ticket_id);
                }
            }
        }

        metrics::counter!("ticket_reservations_total", "outcome" => "reserved")
            .increment(reserved.len() as u64);
        metrics::counter!("ticket_reservations_total", "outcome" => "failed")
            .increment(failed.len() as u64);
        metrics::counter!("ticket_revocations_total").increment(revoked.len() as u64);

        let mut updates = Vec::new();
        if !reserved.is_empty() {
            updates.push(Update::Reserved(reserved));
        }
        if !failed.is_empty() {
            updates.push(Update::Failed(failed));
        }
        if !revoked.is_empty() {
            updates.push(Update::Revoked(revoked));
        }

        for (list_id, ticket_ids) in refused {
            updates.push(Update::Unassigned(Allocation {
                ticket_ids,
                list_id,
            }));
        }

        for (list_id, tickets) in allocated {
            if unsettled.contains(&list_id) {
                continue;
            }
            match self.sync_list(allocator_id, list_id, &tickets).await {
                Ok(true) => updates.push(Update::Assigned(list_id)),
                Ok(false) => {}
                Err(e) => tracing::warn!(%list_id, error = %e, "ticket list sync failed"),
            }
        }

        updates
    }

    /// Folds one round of updates into the saga.
    ///
    /// A reservation can land after the saga already reverted past the ticket
    /// (an abort revoked it while the call was in flight). The saga drops such
    /// updates, so the ticket is revoked here instead of staying held.
    async fn fold(
        &self,
        allocator_id: AllocatorId,
        updates: &[Update],
    ) -> Result<CommandResult<TicketAllocator, bool>, SagaError> {
        let result = self
            .allocators
            .transact::<_, SagaError, _>(allocator_id, |allocator| {
                allocator.decide(Utc::now(), updates, None)
            })
            .await?;
        self.observe(&result.events);

        let reserved: BTreeSet<TicketId> = updates
            .iter()
            .filter_map(|update| match update {
                Update::Reserved(ids) => Some(ids),
                _ => None,
            })
            .flatten()
            .copied()
            .collect();
        let late = result.aggregate.untracked(&reserved);
        if !late.is_empty() {
            self.revoke_untracked(allocator_id, late).await;
        }

        Ok(result)
    }

    async fn revoke_untracked(&self, allocator_id: AllocatorId, tickets: BTreeSet<TicketId>) {
        tracing::info!(tickets = tickets.len(), "revoking reservations the saga no longer tracks");
        let calls = tickets.into_iter().map(|t| (t, TicketIntent::Revoke)).collect();

        for (ticket_id, _, outcome) in self.sync_tickets(allocator_id, calls).await {
            match outcome {
                Ok(_) => metrics::counter!("ticket_late_reservations_revoked_total").increment(1),
                Err(e) => {
                    tracing::error!(%ticket_id, error = %e, "failed to revoke untracked reservation")
                }
            }
        }
    }

    /// Runs ticket decisions with bounded parallelism.
    async fn sync_tickets(
        &self,
        allocator_id: AllocatorId,
        calls: Vec<(TicketId, TicketIntent)>,
    ) -> Vec<TicketOutcome> {
        let calls = calls.into_iter().map(|(ticket_id, intent)| async move {
            let outcome = match self.permits.acquire().await {
                Ok(_permit) => {
                    tracing::debug!(%ticket_id, intent = intent.as_str(), "ticket call");
                    self.tickets
                        .sync(ticket_id, allocator_id, intent)
                        .await
                        .map_err(SagaError::from)
                }
                Err(e) => Err(SagaError::from(e)),
            };
            (ticket_id, intent, outcome)
        });
        join_all(calls).await
    }

    /// Makes `list_id` own `to_acquire`, re-reading the list after each conflict.
    ///
    /// Returns false once the attempt budget is spent without converging.
    #[tracing::instrument(skip(self, to_acquire), fields(tickets = to_acquire.len()))]
    async fn sync_list(
        &self,
        allocator_id: AllocatorId,
        list_id: TicketListId,
        to_acquire: &BTreeSet<TicketId>,
    ) -> Result<bool, SagaError> {
        let mut known = self.lists.owned(list_id).await?;

        for attempt in 1..=self.config.sync_attempts {
            let outstanding: BTreeSet<TicketId> = to_acquire.difference(&known).copied().collect();
            if outstanding.is_empty() {
                return Ok(true);
            }

            match self
                .lists
                .sync(list_id, allocator_id, &known, &BTreeSet::new(), &outstanding)
                .await?
            {
                ListSync::Ok(_) => return Ok(true),
                ListSync::Conflict(current) => {
                    metrics::counter!("ticket_list_sync_conflicts_total").increment(1);
                    tracing::debug!(attempt, "ticket list changed concurrently, retrying");
                    known = current;
                }
            }
        }

        tracing::warn!(
            attempts = self.config.sync_attempts,
            "ticket list sync did not converge"
        );
        Ok(false)
    }

    fn observe(&self, events: &[AllocatorEvent]) {
        for event in events {
            match event {
                AllocatorEvent::Cancelled => {
                    metrics::counter!("allocator_cancelled_total").increment(1);
                    tracing::info!("allocator cancelled, reverting");
                }
                AllocatorEvent::Aborted => {
                    metrics::counter!("allocator_aborted_total").increment(1);
                    tracing::info!("allocator aborted, reverting");
                }
                AllocatorEvent::Completed => {
                    metrics::counter!("allocator_completed_total").increment(1);
                    tracing::info!("allocator completed");
                }
                _ => {}
            }
        }
    }
}
