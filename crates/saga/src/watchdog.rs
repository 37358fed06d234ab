//! Periodic abort of allocators that outlived their cutoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::AllocatorId;
use event_store::EventStore;
use tokio::time::MissedTickBehavior;

use crate::error::SagaError;
use crate::process_manager::{ProcessCommand, ProcessManager};
use crate::services::TicketListService;

/// Scans allocators and aborts the ones still running past their cutoff.
pub struct Watchdog<S, L>
where
    S: EventStore,
    L: TicketListService,
{
    manager: Arc<ProcessManager<S, L>>,
}

impl<S, L> Watchdog<S, L>
where
    S: EventStore + Clone,
    L: TicketListService,
{
    pub fn new(manager: Arc<ProcessManager<S, L>>) -> Self {
        Self { manager }
    }

    /// Aborts every allocator expired at `now`; returns the ones aborted.
    ///
    /// A failure on one allocator is logged and does not stop the scan.
    #[tracing::instrument(skip(self))]
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<Vec<AllocatorId>, SagaError> {
        let mut aborted = Vec::new();

        for allocator_id in self.manager.allocator_ids().await? {
            let Some(allocator) = self.manager.allocator(allocator_id).await? else {
                continue;
            };
            if !allocator.is_expired(now) {
                continue;
            }

            match self
                .manager
                .execute(allocator_id, ProcessCommand::Abort)
                .await
            {
                Ok(status) => {
                    tracing::info!(%allocator_id, status = status.as_str(), "aborted expired allocator");
                    aborted.push(allocator_id);
                }
                Err(SagaError::CommandRejected { .. }) => {
                    tracing::debug!(%allocator_id, "allocator settled before abort");
                }
                Err(e) => {
                    tracing::warn!(%allocator_id, error = %e, "failed to abort expired allocator");
                }
            }
        }

        Ok(aborted)
    }

    /// Scans every `interval` until `shutdown` resolves.
    pub async fn run(&self, interval: Duration, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        tracing::info!(?interval, "watchdog started");
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        tracing::warn!(error = %e, "watchdog scan failed");
                    }
                }
            }
        }
        tracing::info!("watchdog stopped");
    }
}
