//! Catalog storage seam shared by the in-memory and PostgreSQL backends.

use async_trait::async_trait;
use common::ProductId;

use crate::{IdempotencyRecord, Product, error::StoreError};

/// A unit of work against the catalog.
///
/// Effects become visible to other transactions only after [`commit`].
/// Dropping a transaction without committing discards its effects.
///
/// [`commit`]: Transaction::commit
#[async_trait]
pub trait Transaction: Send {
    /// Claims `key`; fails with `StoreError::UniqueViolation` if it already
    /// belongs to a committed action.
    async fn insert_idempotency_key(&mut self, key: &str) -> Result<(), StoreError>;

    /// Takes an exclusive lock on a product row held until the transaction ends.
    async fn lock_product(&mut self, id: &ProductId) -> Result<Option<Product>, StoreError>;

    async fn update_stock(&mut self, id: &ProductId, stock: i64) -> Result<(), StoreError>;

    /// Adds `delta` to a product's stock. Returns false if the product does not exist.
    async fn increment_stock(&mut self, id: &ProductId, delta: i64) -> Result<bool, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// A catalog backend able to open transactions.
#[async_trait]
pub trait Database: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Reads the committed state of a product.
    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError>;

    /// Inserts or replaces a product outside of any reservation.
    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError>;

    async fn idempotency_record(&self, key: &str)
    -> Result<Option<IdempotencyRecord>, StoreError>;

    async fn has_idempotency_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.idempotency_record(key).await?.is_some())
    }
}
