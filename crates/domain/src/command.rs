//! Command handling infrastructure.

use std::marker::PhantomData;

use common::AggregateId;
use event_store::{AppendOptions, EventEnvelope, EventStore, EventStoreError, Version};

use crate::aggregate::{Aggregate, DomainEvent, LoadStrategy};
use crate::error::DomainError;

/// Default optimistic concurrency attempt budget per transaction.
pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Result of a committed decision.
#[derive(Debug)]
pub struct CommandResult<A: Aggregate, R = ()> {
    /// Whatever the decision reported back to its caller.
    pub outcome: R,

    /// The aggregate after applying the new events.
    pub aggregate: A,

    /// The events that were generated and persisted.
    pub events: Vec<A::Event>,

    /// The version of the aggregate after the command.
    pub new_version: Version,
}

/// Handler for executing decisions against aggregates.
///
/// The handler is responsible for:
/// 1. Loading the aggregate from the event store
/// 2. Running the decision to produce an outcome and events
/// 3. Appending the events with an expected-version check
/// 4. Reloading and re-deciding when another writer got there first
pub struct CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    store: S,
    max_attempts: usize,
    load_strategy: LoadStrategy,
    _phantom: PhantomData<A>,
}

impl<S, A> CommandHandler<S, A>
where
    S: EventStore,
    A: Aggregate,
{
    /// Creates a new command handler with the given event store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            load_strategy: A::load_strategy(),
            _phantom: PhantomData,
        }
    }

    /// Overrides the optimistic concurrency attempt budget (minimum 1).
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Overrides how the aggregate is rebuilt from its stream.
    pub fn with_load_strategy(mut self, load_strategy: LoadStrategy) -> Self {
        self.load_strategy = load_strategy;
        self
    }

    /// Returns a reference to the underlying event store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Loads an aggregate from the event store.
    ///
    /// If the aggregate doesn't exist, returns a default instance at version 0.
    pub async fn load(&self, aggregate_id: impl Into<AggregateId>) -> Result<A, DomainError> {
        let aggregate_id = aggregate_id.into();
        let events = match self.load_strategy {
            LoadStrategy::FullReplay => self.store.get_events_for_aggregate(aggregate_id).await?,
            LoadStrategy::LatestEvent => self
                .store
                .get_last_event_for_aggregate(aggregate_id)
                .await?
                .into_iter()
                .collect(),
        };

        let mut aggregate = A::default();
        for envelope in events {
            let event: A::Event = envelope.decode()?;
            aggregate.apply(event);
            aggregate.set_version(envelope.version);
        }

        Ok(aggregate)
    }

    /// Loads an aggregate, returning None if it has no events.
    pub async fn load_existing(
        &self,
        aggregate_id: impl Into<AggregateId>,
    ) -> Result<Option<A>, DomainError> {
        let aggregate = self.load(aggregate_id).await?;
        if aggregate.version() == Version::initial() {
            Ok(None)
        } else {
            Ok(Some(aggregate))
        }
    }

    /// Runs a decision against the current state and appends its events.
    ///
    /// On a version conflict the aggregate is reloaded and the decision is
    /// run again against the fresh state, up to the attempt budget. A
    /// decision that produces no events is not appended and cannot conflict.
    pub async fn transact<R, E, F>(
        &self,
        aggregate_id: impl Into<AggregateId>,
        mut decide: F,
    ) -> Result<CommandResult<A, R>, E>
    where
        F: FnMut(&A) -> Result<(R, Vec<A::Event>), A::Error>,
        E: From<DomainError> + From<A::Error>,
    {
        let aggregate_id = aggregate_id.into();

        for attempt in 1..=self.max_attempts {
            let mut aggregate = self.load(aggregate_id).await?;
            let current_version = aggregate.version();

            let (outcome, events) = decide(&aggregate)?;

            if events.is_empty() {
                return Ok(CommandResult {
                    outcome,
                    aggregate,
                    events,
                    new_version: current_version,
                });
            }

            let envelopes = build_envelopes::<A>(aggregate_id, current_version, &events)
                .map_err(DomainError::from)?;

            match self
                .store
                .append(envelopes, AppendOptions::expect_version(current_version))
                .await
            {
                Ok(new_version) => {
                    aggregate.apply_events(events.iter().cloned());
                    aggregate.set_version(new_version);
                    return Ok(CommandResult {
                        outcome,
                        aggregate,
                        events,
                        new_version,
                    });
                }
                Err(e @ EventStoreError::ConcurrencyConflict { .. }) => {
                    metrics::counter!("command_retries_total", "aggregate_type" => A::aggregate_type())
                        .increment(1);
                    tracing::debug!(
                        aggregate_type = A::aggregate_type(),
                        %aggregate_id,
                        attempt,
                        error = %e,
                        "conflict appending decision, retrying against fresh state"
                    );
                }
                Err(e) => return Err(DomainError::from(e).into()),
            }
        }

        tracing::warn!(
            aggregate_type = A::aggregate_type(),
            %aggregate_id,
            attempts = self.max_attempts,
            "optimistic concurrency budget exhausted"
        );
        Err(DomainError::RetriesExhausted {
            aggregate_type: A::aggregate_type(),
            aggregate_id: aggregate_id.to_string(),
            attempts: self.max_attempts,
        }
        .into())
    }
}

/// Builds event envelopes for events decided at `current_version`.
fn build_envelopes<A: Aggregate>(
    aggregate_id: AggregateId,
    current_version: Version,
    events: &[A::Event],
) -> Result<Vec<EventEnvelope>, EventStoreError> {
    let mut envelopes = Vec::with_capacity(events.len());
    let mut version = current_version;

    for event in events {
        version = version.next();
        let envelope = EventEnvelope::builder()
            .aggregate_id(aggregate_id)
            .aggregate_type(A::aggregate_type())
            .event_type(event.event_type())
            .version(version)
            .payload(event)?
            .build()?;
        envelopes.push(envelope);
    }

    Ok(envelopes)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use async_trait::async_trait;
    use event_store::{EventQuery, InMemoryEventStore};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    enum TestEvent {
        Named { name: String },
        Updated { value: i32 },
    }

    impl DomainEvent for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Named { .. } => "TestNamed",
                TestEvent::Updated { .. } => "TestUpdated",
            }
        }
    }

    #[derive(Debug, Default, Clone)]
    struct TestAggregate {
        name: String,
        value: i32,
        version: Version,
    }

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("invalid value: {0}")]
        InvalidValue(i32),
    }

    impl Aggregate for TestAggregate {
        type Event = TestEvent;
        type Error = TestError;

        fn aggregate_type() -> &'static str {
            "TestAggregate"
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                TestEvent::Named { name } => self.name = name,
                TestEvent::Updated { value } => self.value = value,
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum TestFailure {
        #[error(transparent)]
        Domain(#[from] DomainError),
        #[error(transparent)]
        Test(#[from] TestError),
    }

    /// Store that lets another writer win the race on the next `interferences` appends.
    #[derive(Clone, Default)]
    struct InterferingStore {
        inner: InMemoryEventStore,
        interferences: Arc<AtomicUsize>,
    }

    impl InterferingStore {
        fn interfere(&self, times: usize) {
            self.interferences.store(times, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventStore for InterferingStore {
        async fn append(
            &self,
            events: Vec<EventEnvelope>,
            options: AppendOptions,
        ) -> event_store::Result<Version> {
            let pending = self.interferences.load(Ordering::SeqCst);
            if pending > 0 {
                self.interferences.store(pending - 1, Ordering::SeqCst);
                let aggregate_id = events[0].aggregate_id;
                let current = self
                    .inner
                    .get_aggregate_version(aggregate_id)
                    .await?
                    .unwrap_or(Version::initial());
                let interloper = EventEnvelope::builder()
                    .aggregate_id(aggregate_id)
                    .aggregate_type(TestAggregate::aggregate_type())
                    .event_type("TestUpdated")
                    .version(current.next())
                    .payload(&TestEvent::Updated { value: 10 })?
                    .build()?;
                self.inner
                    .append(vec![interloper], AppendOptions::expect_version(current))
                    .await?;
            }
            self.inner.append(events, options).await
        }

        async fn get_events_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.get_events_for_aggregate(aggregate_id).await
        }

        async fn get_last_event_for_aggregate(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<EventEnvelope>> {
            self.inner.get_last_event_for_aggregate(aggregate_id).await
        }

        async fn query_events(&self, query: EventQuery) -> event_store::Result<Vec<EventEnvelope>> {
            self.inner.query_events(query).await
        }

        async fn get_aggregate_version(
            &self,
            aggregate_id: AggregateId,
        ) -> event_store::Result<Option<Version>> {
            self.inner.get_aggregate_version(aggregate_id).await
        }
    }

    type Handler = CommandHandler<InterferingStore, TestAggregate>;

    fn handler() -> (Handler, InterferingStore) {
        let store = InterferingStore::default();
        (CommandHandler::new(store.clone()), store)
    }

    #[tokio::test]
    async fn transact_creates_aggregate() {
        let (handler, _) = handler();
        let id = AggregateId::new();

        let result = handler
            .transact::<_, TestFailure, _>(id, |_| {
                Ok((
                    "created",
                    vec![TestEvent::Named {
                        name: "Test".to_string(),
                    }],
                ))
            })
            .await
            .unwrap();

        assert_eq!(result.outcome, "created");
        assert_eq!(result.events.len(), 1);
        assert_eq!(result.new_version, Version::first());
        assert_eq!(result.aggregate.name, "Test");
    }

    #[tokio::test]
    async fn transact_builds_on_previous_state() {
        let (handler, _) = handler();
        let id = AggregateId::new();

        handler
            .transact::<_, TestFailure, _>(id, |_| Ok(((), vec![TestEvent::Updated { value: 40 }])))
            .await
            .unwrap();
        let result = handler
            .transact::<_, TestFailure, _>(id, |agg| {
                Ok(((), vec![TestEvent::Updated { value: agg.value + 2 }]))
            })
            .await
            .unwrap();

        assert_eq!(result.new_version, Version::new(2));
        assert_eq!(result.aggregate.value, 42);
    }

    #[tokio::test]
    async fn transact_propagates_decision_error() {
        let (handler, _) = handler();

        let result = handler
            .transact::<(), TestFailure, _>(AggregateId::new(), |_| {
                Err(TestError::InvalidValue(-1))
            })
            .await;

        assert!(matches!(
            result,
            Err(TestFailure::Test(TestError::InvalidValue(-1)))
        ));
    }

    #[tokio::test]
    async fn empty_decision_is_not_persisted() {
        let (handler, store) = handler();

        let result = handler
            .transact::<_, TestFailure, _>(AggregateId::new(), |_| Ok((false, vec![])))
            .await
            .unwrap();

        assert!(!result.outcome);
        assert_eq!(result.new_version, Version::initial());
        assert_eq!(store.inner.event_count().await, 0);
    }

    #[tokio::test]
    async fn conflicting_writer_causes_redecision() {
        let (handler, store) = handler();
        let id = AggregateId::new();
        let calls = AtomicUsize::new(0);
        store.interfere(1);

        let result = handler
            .transact::<_, TestFailure, _>(id, |agg| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok((agg.value, vec![TestEvent::Updated { value: agg.value + 1 }]))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result.outcome, 10);
        assert_eq!(result.aggregate.value, 11);
        assert_eq!(result.new_version, Version::new(2));
    }

    #[tokio::test]
    async fn exhausted_budget_surfaces_conflict() {
        let store = InterferingStore::default();
        let handler: Handler = CommandHandler::new(store.clone()).with_max_attempts(2);
        let calls = AtomicUsize::new(0);
        store.interfere(5);

        let result = handler
            .transact::<(), TestFailure, _>(AggregateId::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(((), vec![TestEvent::Updated { value: -1 }]))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match result {
            Err(TestFailure::Domain(err)) => {
                assert!(err.is_conflict());
                assert!(matches!(
                    err,
                    DomainError::RetriesExhausted { attempts: 2, .. }
                ));
            }
            other => panic!("expected exhausted retries, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn load_existing_distinguishes_new_streams() {
        let (handler, _) = handler();
        let id = AggregateId::new();

        assert!(handler.load_existing(id).await.unwrap().is_none());

        handler
            .transact::<_, TestFailure, _>(id, |_| {
                Ok(((), vec![TestEvent::Named { name: "x".into() }]))
            })
            .await
            .unwrap();

        let loaded = handler.load_existing(id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "x");
        assert_eq!(loaded.version(), Version::first());
    }

    #[tokio::test]
    async fn latest_event_load_uses_only_the_tail() {
        let store = InterferingStore::default();
        let full: Handler = CommandHandler::new(store.clone());
        let tail: Handler =
            CommandHandler::new(store.clone()).with_load_strategy(LoadStrategy::LatestEvent);
        let id = AggregateId::new();

        full.transact::<_, TestFailure, _>(id, |_| {
            Ok((
                (),
                vec![
                    TestEvent::Named { name: "kept".into() },
                    TestEvent::Updated { value: 3 },
                ],
            ))
        })
        .await
        .unwrap();

        let replayed = full.load(id).await.unwrap();
        let from_tail = tail.load(id).await.unwrap();

        // TestAggregate events do not supersede each other, so only the tail survives
        assert_eq!(replayed.name, "kept");
        assert_eq!(from_tail.name, "");
        assert_eq!(from_tail.value, 3);
        assert_eq!(from_tail.version(), replayed.version());
    }
}
