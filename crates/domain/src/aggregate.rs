//! Core aggregate and domain event traits.

use event_store::Version;
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is the variant tag of the event and is stored alongside the
    /// payload, so it is part of the wire contract.
    fn event_type(&self) -> &'static str;
}

/// How an aggregate is rebuilt from its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadStrategy {
    /// Replay every event from the start of the stream.
    #[default]
    FullReplay,

    /// Apply only the most recent event.
    ///
    /// Valid only for aggregates where each event fully supersedes the prior
    /// state; the result must be identical to a full replay.
    LatestEvent,
}

/// Trait for aggregates in an event-sourced system.
///
/// In event sourcing, aggregates:
/// - Are rebuilt by replaying events
/// - Generate events from commands
/// - Apply events to update state (pure, deterministic)
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// The type of errors this aggregate can produce.
    type Error: std::error::Error + Send + Sync;

    /// Returns the aggregate type name.
    ///
    /// Used for event store organization and routing.
    fn aggregate_type() -> &'static str;

    /// Returns the current version of the aggregate.
    ///
    /// Version starts at 0 for a new aggregate and increments with each event.
    fn version(&self) -> Version;

    /// Sets the aggregate version.
    ///
    /// Called by the command handler after loading events.
    fn set_version(&mut self, version: Version);

    /// Applies an event to the aggregate, updating its state.
    ///
    /// This method must be pure and deterministic:
    /// - Given the same state and event, it must always produce the same new state
    /// - It must not have side effects
    /// - It must not fail (events represent facts that have happened)
    fn apply(&mut self, event: Self::Event);

    /// Checks that a freshly decided event is legal in the current state.
    ///
    /// Stored events are facts and are never validated on replay; this hook
    /// guards only events that are about to be appended.
    fn validate(&self, _event: &Self::Event) -> Result<(), Self::Error> {
        Ok(())
    }

    /// How the command handler should rebuild this aggregate.
    fn load_strategy() -> LoadStrategy {
        LoadStrategy::FullReplay
    }

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}
