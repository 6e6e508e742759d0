//! Append-only event journal with optimistic concurrency per stream.
//!
//! Every durable saga instance and every shipment child process records its
//! progress as a stream of [`EventEnvelope`]s. Replaying a stream rebuilds the
//! instance after a restart.

pub mod error;
pub mod event;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::StreamId;
pub use error::{EventStoreError, Result};
pub use event::{EventEnvelope, EventEnvelopeBuilder, EventId, Version};
pub use memory::InMemoryEventStore;
pub use postgres::PostgresEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt};
