//! Saga error types.

use common::{OrderId, StreamId};
use domain::{InvalidAdminAction, ValidationError};
use event_store::EventStoreError;
use inventory::InventoryError;
use thiserror::Error;

use crate::state::OrderState;

/// Errors that can occur during saga operations.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The order is malformed and was never started.
    #[error("invalid order: {0}")]
    Validation(#[from] ValidationError),

    /// A saga is already journaled under this order id.
    #[error("order {0} already exists")]
    DuplicateOrder(OrderId),

    #[error("order {0} not found")]
    OrderNotFound(OrderId),

    #[error(transparent)]
    InvalidAction(#[from] InvalidAdminAction),

    /// The state machine refused an edge.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: OrderState, to: OrderState },

    /// A compensation step failed.
    #[error("compensation step '{step}' failed: {reason}")]
    CompensationFailed { step: String, reason: String },

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("shipping service error: {0}")]
    ShippingService(String),

    /// A shipment child process ended without reporting an outcome.
    #[error("child process {child} aborted: {reason}")]
    ChildAborted { child: StreamId, reason: String },

    /// A wait point lost its signal channel.
    #[error("signal window for order {0} closed while waiting")]
    WaitInterrupted(OrderId),

    /// The journal does not describe a saga this code can resume.
    #[error("corrupt journal: {0}")]
    CorruptJournal(String),

    #[error("invalid saga configuration: {0}")]
    Config(String),

    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Whether a step that failed with this error may succeed on another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            SagaError::Inventory(err) => err.is_transient(),
            SagaError::ShippingService(_) => true,
            SagaError::EventStore(err) => err.is_transient(),
            _ => false,
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
