//! Inventory seam of the saga.

use async_trait::async_trait;
use common::{OrderId, ProductId};
use ::inventory::{Database, Execution, InventoryReservationStore};

use crate::error::SagaError;

/// Stock operations the saga drives. Both must be idempotent per order.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Takes one unit per item for the order.
    async fn reserve(&self, order_id: &OrderId, items: &[ProductId]) -> Result<(), SagaError>;

    /// Returns the units taken by [`InventoryService::reserve`].
    async fn release(&self, order_id: &OrderId, items: &[ProductId]) -> Result<(), SagaError>;
}

#[async_trait]
impl<D: Database> InventoryService for InventoryReservationStore<D> {
    async fn reserve(&self, order_id: &OrderId, items: &[ProductId]) -> Result<(), SagaError> {
        let execution = InventoryReservationStore::reserve(self, order_id, items).await?;
        if execution == Execution::Duplicate {
            tracing::debug!(%order_id, "reservation already applied");
        }
        Ok(())
    }

    async fn release(&self, order_id: &OrderId, items: &[ProductId]) -> Result<(), SagaError> {
        match InventoryReservationStore::release(self, order_id, items).await? {
            Execution::Applied => {}
            Execution::Duplicate => tracing::debug!(%order_id, "release already applied"),
            Execution::Skipped => tracing::warn!(%order_id, "nothing reserved to release"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use ::inventory::{InMemoryDatabase, Product};

    use super::*;

    async fn stock(store: &InventoryReservationStore<InMemoryDatabase>, id: &str) -> i64 {
        store
            .database()
            .product(&ProductId::new(id))
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    #[tokio::test]
    async fn reserve_and_release_through_the_seam() {
        let store = InventoryReservationStore::new(InMemoryDatabase::with_products([
            Product::new("iPhone15", "iPhone 15", 3, 8000),
        ]));
        let service: &dyn InventoryService = &store;
        let order = OrderId::new("ORD-1");
        let items = [ProductId::new("iPhone15"), ProductId::new("iPhone15")];

        service.reserve(&order, &items).await.unwrap();
        service.reserve(&order, &items).await.unwrap();
        assert_eq!(stock(&store, "iPhone15").await, 1);

        service.release(&order, &items).await.unwrap();
        service.release(&order, &items).await.unwrap();
        assert_eq!(stock(&store, "iPhone15").await, 3);
    }

    #[tokio::test]
    async fn out_of_stock_surfaces_as_permanent_error() {
        let store = InventoryReservationStore::new(InMemoryDatabase::with_products([
            Product::new("MacPro", "Mac Pro", 0, 20000),
        ]));

        let err = InventoryService::reserve(&store, &OrderId::new("ORD-2"), &[ProductId::new("MacPro")])
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.to_string().contains("out of stock"));
    }
}
