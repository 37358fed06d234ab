use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    AggregateId, EventEnvelope, EventQuery, EventStoreError, Result, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Debug, Default)]
struct Inner {
    streams: HashMap<AggregateId, Vec<EventEnvelope>>,
    /// Global append order as (stream, index within stream).
    log: Vec<(AggregateId, usize)>,
}

impl Inner {
    fn current_version(&self, aggregate_id: &AggregateId) -> Version {
        self.streams
            .get(aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version)
            .unwrap_or(Version::initial())
    }
}

/// In-memory event store.
///
/// Streams and the global log live behind a single lock, so an append is
/// checked and applied atomically like a transactional store would.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        let mut inner = self.inner.write().await;
        inner.streams.clear();
        inner.log.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let aggregate_id = events[0].aggregate_id;
        let first_new_version = events[0].version;

        let mut inner = self.inner.write().await;
        let current_version = inner.current_version(&aggregate_id);

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual: current_version,
            });
        }

        // Versions are unique per stream
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);

        let stream = inner.streams.entry(aggregate_id).or_default();
        let start = stream.len();
        let count = events.len();
        stream.extend(events);
        inner
            .log
            .extend((start..start + count).map(|index| (aggregate_id, index)));

        tracing::trace!(%aggregate_id, version = %last_version, count, "events appended");
        Ok(last_version)
    }

    async fn get_events_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner.streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    async fn get_last_event_for_aggregate(
        &self,
        aggregate_id: AggregateId,
    ) -> Result<Option<EventEnvelope>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .cloned())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<EventEnvelope>> {
        let inner = self.inner.read().await;
        let matching = inner
            .log
            .iter()
            .filter_map(|(id, index)| inner.streams.get(id).and_then(|s| s.get(*index)))
            .filter(|e| query.matches(e))
            .skip(query.offset.unwrap_or(0));

        let events = match query.limit {
            Some(limit) => matching.take(limit).cloned().collect(),
            None => matching.cloned().collect(),
        };
        Ok(events)
    }

    async fn get_aggregate_version(&self, aggregate_id: AggregateId) -> Result<Option<Version>> {
        let inner = self.inner.read().await;
        Ok(inner
            .streams
            .get(&aggregate_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }
}
