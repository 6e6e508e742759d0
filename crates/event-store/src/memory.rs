use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, Result, StreamId, Version,
    store::{AppendOptions, EventStore, validate_events_for_append},
};

#[derive(Default)]
struct Streams {
    by_id: HashMap<StreamId, Vec<EventEnvelope>>,
    created: Vec<StreamId>,
}

/// In-memory journal with the same semantics as the PostgreSQL one.
///
/// Clones share the same underlying streams, so a "restarted" process in a
/// test can be simulated by handing a clone to a fresh coordinator.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<RwLock<Streams>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored across all streams.
    pub async fn event_count(&self) -> usize {
        self.streams.read().await.by_id.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let stream_id = events[0].stream_id.clone();
        let first_new_version = events[0].version;

        let mut streams = self.streams.write().await;
        let current_version = streams
            .by_id
            .get(&stream_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version)
            .unwrap_or(Version::initial());

        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual: current_version,
            });
        }

        // Mirrors the unique (stream_id, version) constraint.
        if first_new_version != current_version.next() {
            return Err(EventStoreError::ConcurrencyConflict {
                stream_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(current_version);

        if !streams.by_id.contains_key(&stream_id) {
            streams.created.push(stream_id.clone());
        }
        streams.by_id.entry(stream_id).or_default().extend(events);

        Ok(last_version)
    }

    async fn read_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        let streams = self.streams.read().await;
        Ok(streams.by_id.get(stream_id).cloned().unwrap_or_default())
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        let streams = self.streams.read().await;
        Ok(streams
            .by_id
            .get(stream_id)
            .and_then(|stream| stream.last())
            .map(|e| e.version))
    }

    async fn list_streams(&self, stream_type: &str) -> Result<Vec<StreamId>> {
        let streams = self.streams.read().await;
        Ok(streams
            .created
            .iter()
            .filter(|id| {
                streams
                    .by_id
                    .get(*id)
                    .and_then(|stream| stream.first())
                    .is_some_and(|e| e.stream_type == stream_type)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventStoreExt;

    fn create_test_event(stream: &str, version: Version, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(StreamId::new(stream))
            .stream_type("TestStream")
            .event_type(event_type)
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn append_and_read_back() {
        let store = InMemoryEventStore::new();
        let events = vec![
            create_test_event("s-1", Version::new(1), "Event1"),
            create_test_event("s-1", Version::new(2), "Event2"),
        ];

        let version = store
            .append(events, AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::new(2));

        let stored = store.read_stream(&StreamId::new("s-1")).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].event_type, "Event2");
        assert_eq!(store.event_count().await, 2);
    }

    #[tokio::test]
    async fn expect_new_rejects_existing_stream() {
        let store = InMemoryEventStore::new();
        store
            .append_event(
                create_test_event("s-1", Version::first(), "Event1"),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();

        let result = store
            .append_event(
                create_test_event("s-1", Version::first(), "Event1"),
                AppendOptions::expect_new(),
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { .. })
        ));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts() {
        let store = InMemoryEventStore::new();
        store
            .append_event(
                create_test_event("s-1", Version::first(), "Event1"),
                AppendOptions::expect_new(),
            )
            .await
            .unwrap();
        store
            .append_event(
                create_test_event("s-1", Version::new(2), "Event2"),
                AppendOptions::expect_version(Version::first()),
            )
            .await
            .unwrap();

        let result = store
            .append_event(
                create_test_event("s-1", Version::new(2), "Event2"),
                AppendOptions::expect_version(Version::first()),
            )
            .await;

        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn version_gap_without_expectation_conflicts() {
        let store = InMemoryEventStore::new();
        let result = store
            .append_event(
                create_test_event("s-1", Version::new(3), "Event3"),
                AppendOptions::new(),
            )
            .await;

        assert!(result.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn stream_version_tracks_appends() {
        let store = InMemoryEventStore::new();
        let id = StreamId::new("s-1");
        assert_eq!(store.stream_version(&id).await.unwrap(), None);
        assert!(!store.stream_exists(&id).await.unwrap());

        store
            .append_event(
                create_test_event("s-1", Version::first(), "Event1"),
                AppendOptions::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            store.stream_version(&id).await.unwrap(),
            Some(Version::first())
        );
    }

    #[tokio::test]
    async fn list_streams_filters_by_type_in_creation_order() {
        let store = InMemoryEventStore::new();
        for name in ["b", "a"] {
            store
                .append_event(
                    create_test_event(name, Version::first(), "Event1"),
                    AppendOptions::new(),
                )
                .await
                .unwrap();
        }
        let other = EventEnvelope::builder()
            .stream_id(StreamId::new("c"))
            .stream_type("OtherStream")
            .event_type("Event1")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap();
        store
            .append_event(other, AppendOptions::new())
            .await
            .unwrap();

        let listed = store.list_streams("TestStream").await.unwrap();
        assert_eq!(listed, vec![StreamId::new("b"), StreamId::new("a")]);
    }
}
