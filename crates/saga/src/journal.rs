//! Appending to and loading from journal streams.

use common::StreamId;
use domain::{Aggregate, DomainEvent, replay};
use event_store::{AppendOptions, EventEnvelope, EventStore, Version};

use crate::error::Result;

/// Appends one event after `current`, failing if another writer got there first.
pub(crate) async fn append<S, E>(
    store: &S,
    stream_id: &StreamId,
    stream_type: &str,
    current: Version,
    event: &E,
) -> Result<Version>
where
    S: EventStore + ?Sized,
    E: DomainEvent,
{
    let envelope = EventEnvelope::builder()
        .event_type(event.event_type())
        .stream_id(stream_id.clone())
        .stream_type(stream_type)
        .version(current.next())
        .payload(event)?
        .build()?;

    Ok(store
        .append(vec![envelope], AppendOptions::expect_version(current))
        .await?)
}

/// Replays a stream, None when it has no events.
pub(crate) async fn load<S, A>(store: &S, stream_id: &StreamId) -> Result<Option<A>>
where
    S: EventStore + ?Sized,
    A: Aggregate,
{
    let events = store.read_stream(stream_id).await?;
    if events.is_empty() {
        return Ok(None);
    }
    Ok(Some(replay(&events)?))
}
