//! Core aggregate and domain event traits.

use common::StreamId;
use event_store::{EventEnvelope, Version};
use serde::{Serialize, de::DeserializeOwned};

/// Trait for domain events.
///
/// Domain events represent facts that have happened in the domain.
/// They are immutable and should be named in past tense.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + Sync + Clone {
    /// Returns the event type name.
    ///
    /// This is used for serialization and event store filtering.
    fn event_type(&self) -> &'static str;
}

/// Trait for state rebuilt by folding the events of one journal stream.
///
/// Durable processes (saga instances, shipment children) record facts and
/// recover by replaying them:
/// - `apply` is pure and deterministic
/// - `apply` never fails, events are facts that already happened
pub trait Aggregate: Default + Send + Sync + Sized {
    /// The type of events this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Stream type recorded on every envelope of this aggregate.
    fn stream_type() -> &'static str;

    /// Returns the stream owning this aggregate, None before the first event.
    fn stream_id(&self) -> Option<StreamId>;

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

    /// Applies multiple events in sequence.
    fn apply_events(&mut self, events: impl IntoIterator<Item = Self::Event>) {
        for event in events {
            self.apply(event);
        }
    }
}

/// Rebuilds an aggregate from its stored envelopes.
///
/// The aggregate version ends at the version of the last envelope.
pub fn replay<A: Aggregate>(envelopes: &[EventEnvelope]) -> Result<A, serde_json::Error> {
    let mut aggregate = A::default();
    for envelope in envelopes {
        let event: A::Event = serde_json::from_value(envelope.payload.clone())?;
        aggregate.apply(event);
        aggregate.set_version(envelope.version);
    }
    Ok(aggregate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(tag = "type", content = "data")]
    enum CounterEvent {
        Opened { stream: String },
        Added { amount: i64 },
    }

    impl DomainEvent for CounterEvent {
        fn event_type(&self) -> &'static str {
            match self {
                CounterEvent::Opened { .. } => "CounterOpened",
                CounterEvent::Added { .. } => "CounterAdded",
            }
        }
    }

    #[derive(Debug, Default)]
    struct Counter {
        id: Option<StreamId>,
        total: i64,
        version: Version,
    }

    impl Aggregate for Counter {
        type Event = CounterEvent;

        fn stream_type() -> &'static str {
            "Counter"
        }

        fn stream_id(&self) -> Option<StreamId> {
            self.id.clone()
        }

        fn version(&self) -> Version {
            self.version
        }

        fn set_version(&mut self, version: Version) {
            self.version = version;
        }

        fn apply(&mut self, event: Self::Event) {
            match event {
                CounterEvent::Opened { stream } => self.id = Some(StreamId::new(stream)),
                CounterEvent::Added { amount } => self.total += amount,
            }
        }
    }

    fn envelope(version: i64, event: &CounterEvent) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(StreamId::new("counter-1"))
            .stream_type(Counter::stream_type())
            .event_type(event.event_type())
            .version(Version::new(version))
            .payload(event)
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn apply_events_folds_in_order() {
        let mut counter = Counter::default();
        counter.apply_events([
            CounterEvent::Opened {
                stream: "counter-1".to_string(),
            },
            CounterEvent::Added { amount: 2 },
            CounterEvent::Added { amount: 40 },
        ]);

        assert_eq!(counter.stream_id(), Some(StreamId::new("counter-1")));
        assert_eq!(counter.total, 42);
    }

    #[test]
    fn replay_tracks_last_version() {
        let envelopes = vec![
            envelope(
                1,
                &CounterEvent::Opened {
                    stream: "counter-1".to_string(),
                },
            ),
            envelope(2, &CounterEvent::Added { amount: 5 }),
        ];

        let counter: Counter = replay(&envelopes).unwrap();
        assert_eq!(counter.total, 5);
        assert_eq!(counter.version(), Version::new(2));
    }

    #[test]
    fn replay_rejects_foreign_payload() {
        let bad = EventEnvelope::builder()
            .stream_id(StreamId::new("counter-1"))
            .stream_type("Counter")
            .event_type("Unknown")
            .version(Version::first())
            .payload_raw(serde_json::json!({"type": "Unknown"}))
            .build()
            .unwrap();

        assert!(replay::<Counter>(&[bad]).is_err());
    }
}
