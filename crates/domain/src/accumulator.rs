//! Composition of several decisions into a single atomic append.

use crate::aggregate::Aggregate;

/// Evolving aggregate state plus the ordered log of every event decided so far.
///
/// A multi-step transaction is written as a sequence of independent
/// sub-decisions, each seeing the state left by the previous ones. The
/// accumulated events are then appended together under one expected-version
/// check. Folding the starting state over [`Accumulator::accumulated`] always
/// yields [`Accumulator::state`].
#[derive(Debug)]
pub struct Accumulator<A: Aggregate> {
    state: A,
    accumulated: Vec<A::Event>,
}

impl<A: Aggregate> Accumulator<A> {
    /// Starts accumulating from `state`.
    pub fn new(state: A) -> Self {
        Self {
            state,
            accumulated: Vec::new(),
        }
    }

    /// The state after every event ingested so far.
    pub fn state(&self) -> &A {
        &self.state
    }

    /// Events ingested so far, in order.
    pub fn accumulated(&self) -> &[A::Event] {
        &self.accumulated
    }

    /// Folds a decision's events into the state and hands back its result.
    ///
    /// Each event is validated against the state it is about to be applied
    /// to; the first illegal event aborts ingestion and is not recorded.
    pub fn ingest<R>(&mut self, decision: (R, Vec<A::Event>)) -> Result<R, A::Error> {
        let (result, events) = decision;
        for event in events {
            self.state.validate(&event)?;
            self.accumulated.push(event.clone());
            self.state.apply(event);
        }
        Ok(result)
    }

    /// Runs a decision against the current state and ingests it.
    pub fn transact<R>(
        &mut self,
        decide: impl FnOnce(&A) -> (R, Vec<A::Event>),
    ) -> Result<R, A::Error> {
        let decision = decide(&self.state);
        self.ingest(decision)
    }

    /// Splits into the final state and the full event log.
    pub fn into_parts(self) -> (A, Vec<A::Event>) {
        (self.state, self.accumulated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::DomainEvent;
    use event_store::Version;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum CounterEvent {
        Incremented(u32),
        Reset,
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Incremented(_) => "Incremented",
                CounterEvent::Reset => "Reset",
            }
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("counter overflow")]
    struct Overflow;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        total: u64,
        resets: u32,
        version: Version,
    }

    const LIMIT: u64 = 1_000_000;

    impl Aggregate for Counter {
        type Event = CounterEvent;
        type Error = Overflow;

        fn aggregate_type() -> &'static str {
            "Counter"
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Incremented(n) => self.total += u64::from(n),
                CounterEvent::Reset => {
                    self.total = 0;
                    self.resets += 1;
                }
            }
        }

        fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
            match event {
                CounterEvent::Incremented(n) if self.total + u64::from(*n) > LIMIT => Err(Overflow),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn ingest_returns_result_and_records_events() {
        let mut acc = Accumulator::new(Counter::default());

        let first = acc
            .ingest(("first", vec![CounterEvent::Incremented(2)]))
            .unwrap();
        let second = acc.ingest((7, vec![])).unwrap();
        let third = acc
            .transact(|state| {
                (
                    state.total,
                    vec![CounterEvent::Incremented(3), CounterEvent::Incremented(4)],
                )
            })
            .unwrap();

        assert_eq!(first, "first");
        assert_eq!(second, 7);
        assert_eq!(third, 2);
        assert_eq!(acc.state().total, 9);
        assert_eq!(acc.accumulated().len(), 3);
    }

    #[test]
    fn later_decisions_see_earlier_events() {
        let mut acc = Accumulator::new(Counter::default());
        acc.ingest(((), vec![CounterEvent::Incremented(5)])).unwrap();

        let seen = acc.transact(|state| (state.total, vec![])).unwrap();
        assert_eq!(seen, 5);
    }

    #[test]
    fn illegal_event_stops_ingestion_without_recording() {
        let mut acc = Accumulator::new(Counter::default());
        acc.ingest(((), vec![CounterEvent::Incremented(10)])).unwrap();

        let result = acc.ingest((
            (),
            vec![
                CounterEvent::Incremented(1),
                CounterEvent::Incremented(2_000_000),
            ],
        ));

        assert!(result.is_err());
        assert_eq!(acc.accumulated().len(), 2);
        assert_eq!(acc.state().total, 11);
    }

    fn event_strategy() -> impl Strategy<Value = CounterEvent> {
        prop_oneof![
            (0u32..1000).prop_map(CounterEvent::Incremented),
            Just(CounterEvent::Reset),
        ]
    }

    proptest! {
        #[test]
        fn accumulated_log_folds_to_final_state(
            decisions in prop::collection::vec(prop::collection::vec(event_strategy(), 0..5), 0..10)
        ) {
            let start = Counter::default();
            let mut acc = Accumulator::new(start.clone());
            for events in &decisions {
                acc.ingest(((), events.clone())).unwrap();
            }
            let (state, log) = acc.into_parts();

            let mut replayed = start;
            replayed.apply_events(log.clone());
            prop_assert_eq!(&replayed, &state);

            let concatenated: Vec<_> = decisions.into_iter().flatten().collect();
            prop_assert_eq!(log, concatenated);
        }
    }
}
