use common::StreamId;
use thiserror::Error;

use crate::Version;

/// Errors that can occur when interacting with the journal.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The expected stream version did not match the stored one.
    #[error(
        "Concurrency conflict for stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        stream_id: StreamId,
        expected: Version,
        actual: Version,
    },

    /// A batch of events could not be appended as given.
    #[error("Invalid append: {0}")]
    InvalidAppend(String),

    /// An envelope was built without one of its required fields.
    #[error("Event envelope is missing required field `{0}`")]
    MissingField(&'static str),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if this error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// Returns true if the journal was unreachable and the same append may
    /// succeed when retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outages_are_transient_conflicts_are_not() {
        assert!(EventStoreError::Database(sqlx::Error::PoolTimedOut).is_transient());

        let conflict = EventStoreError::ConcurrencyConflict {
            stream_id: StreamId::new("order-fulfillment-ORD-1"),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_conflict());
        assert!(!conflict.is_transient());
        assert!(!EventStoreError::InvalidAppend("empty".into()).is_transient());
    }
}

/// Result type for journal operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
