//! Inventory error types.

use common::ProductId;
use thiserror::Error;

/// Errors raised by a catalog backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The idempotency key was already claimed by a committed action.
    #[error("idempotency key already exists: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Errors raised while reserving or releasing stock.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("product {0} does not exist")]
    ProductNotFound(ProductId),

    #[error("product {0} is out of stock")]
    OutOfStock(ProductId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl InventoryError {
    /// Business rejections are final; only store failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, InventoryError::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, InventoryError>;
