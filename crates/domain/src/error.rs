//! Domain error types.

use thiserror::Error;

/// Reasons an order is rejected before any saga starts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("order id must not be empty")]
    EmptyOrderId,

    #[error("order must contain at least one item")]
    NoItems,

    #[error("item {index} has an empty product id")]
    EmptyProductId { index: usize },

    #[error("amount must be non-negative, got {0}")]
    NegativeAmount(i64),
}

/// An admin action string that is neither APPROVE nor REJECT.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid admin action: {0}")]
pub struct InvalidAdminAction(pub String);
