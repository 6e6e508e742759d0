//! Stock reservations against the durable catalog.

use common::{OrderId, ProductId};

use crate::{
    db::Database,
    error::{InventoryError, Result},
    idempotency::{Execution, IdempotencyGuard},
};

/// Reserves and releases one unit of stock per order item.
///
/// Reserve and release are each keyed by the order ID, so redelivering either
/// one for the same order has no further effect.
///
/// Rows are locked in item order. Two orders listing the same products in
/// opposite orders can still deadlock; the backend is expected to detect it
/// and fail one of them.
#[derive(Debug, Clone)]
pub struct InventoryReservationStore<D> {
    guard: IdempotencyGuard<D>,
}

pub fn reserve_key(order_id: &OrderId) -> String {
    format!("reserve:{order_id}")
}

pub fn release_key(order_id: &OrderId) -> String {
    format!("release:{order_id}")
}

impl<D: Database> InventoryReservationStore<D> {
    pub fn new(db: D) -> Self {
        Self {
            guard: IdempotencyGuard::new(db),
        }
    }

    pub fn database(&self) -> &D {
        self.guard.database()
    }

    /// Takes one unit of every item, or nothing at all.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn reserve(&self, order_id: &OrderId, items: &[ProductId]) -> Result<Execution> {
        let items = items.to_vec();
        let execution = self
            .guard
            .execute::<InventoryError, _>(&reserve_key(order_id), move |tx| {
                Box::pin(async move {
                    for id in &items {
                        let product = tx
                            .lock_product(id)
                            .await?
                            .ok_or_else(|| InventoryError::ProductNotFound(id.clone()))?;
                        if product.stock < 1 {
                            return Err(InventoryError::OutOfStock(id.clone()));
                        }
                        tx.update_stock(id, product.stock - 1).await?;
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!(?execution, "inventory reserved");
        Ok(execution)
    }

    /// Gives back one unit of every item. Unknown products are skipped.
    ///
    /// Only an order whose reservation committed can be released, so stock
    /// never rises above what was taken.
    #[tracing::instrument(skip(self, items), fields(items = items.len()))]
    pub async fn release(&self, order_id: &OrderId, items: &[ProductId]) -> Result<Execution> {
        if !self
            .database()
            .has_idempotency_key(&reserve_key(order_id))
            .await?
        {
            tracing::warn!(%order_id, "release without a committed reservation ignored");
            return Ok(Execution::Skipped);
        }

        let items = items.to_vec();
        let execution = self
            .guard
            .execute::<InventoryError, _>(&release_key(order_id), move |tx| {
                Box::pin(async move {
                    for id in &items {
                        if !tx.increment_stock(id, 1).await? {
                            tracing::warn!(product_id = %id, "released product no longer exists");
                        }
                    }
                    Ok(())
                })
            })
            .await?;

        tracing::info!(?execution, "inventory released");
        Ok(execution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryDatabase, Product};

    fn store() -> InventoryReservationStore<InMemoryDatabase> {
        InventoryReservationStore::new(InMemoryDatabase::with_products([
            Product::new("iPhone15", "iPhone 15", 10, 8_000),
            Product::new("MacPro", "Mac Pro", 1, 20_000),
            Product::new("Empty", "Sold out", 0, 10),
        ]))
    }

    async fn stock(store: &InventoryReservationStore<InMemoryDatabase>, id: &str) -> i64 {
        store
            .database()
            .product(&ProductId::new(id))
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    fn items(ids: &[&str]) -> Vec<ProductId> {
        ids.iter().map(|id| ProductId::new(*id)).collect()
    }

    #[tokio::test]
    async fn reserve_decrements_each_item() {
        let store = store();
        let order = OrderId::new("ORD-1");

        let execution = store
            .reserve(&order, &items(&["iPhone15", "iPhone15", "MacPro"]))
            .await
            .unwrap();

        assert_eq!(execution, Execution::Applied);
        assert_eq!(stock(&store, "iPhone15").await, 8);
        assert_eq!(stock(&store, "MacPro").await, 0);
    }

    #[tokio::test]
    async fn repeated_reserve_is_suppressed() {
        let store = store();
        let order = OrderId::new("ORD-1");

        store.reserve(&order, &items(&["iPhone15"])).await.unwrap();
        let again = store.reserve(&order, &items(&["iPhone15"])).await.unwrap();

        assert_eq!(again, Execution::Duplicate);
        assert_eq!(stock(&store, "iPhone15").await, 9);
        assert!(
            store
                .database()
                .has_idempotency_key(&reserve_key(&order))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn failure_on_later_item_rolls_back_earlier_items() {
        let store = store();
        let order = OrderId::new("ORD-2");

        let result = store
            .reserve(&order, &items(&["iPhone15", "MacPro", "Empty"]))
            .await;

        assert!(matches!(result, Err(InventoryError::OutOfStock(ref id)) if id.as_str() == "Empty"));
        assert_eq!(stock(&store, "iPhone15").await, 10);
        assert_eq!(stock(&store, "MacPro").await, 1);
        assert!(
            !store
                .database()
                .has_idempotency_key(&reserve_key(&order))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_product_fails_reservation() {
        let store = store();
        let result = store
            .reserve(&OrderId::new("ORD-3"), &items(&["Ghost"]))
            .await;

        let err = result.unwrap_err();
        assert!(matches!(err, InventoryError::ProductNotFound(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn release_restores_stock_once() {
        let store = store();
        let order = OrderId::new("ORD-4");
        let reserved = items(&["iPhone15", "MacPro"]);

        store.reserve(&order, &reserved).await.unwrap();
        store.release(&order, &reserved).await.unwrap();
        let again = store.release(&order, &reserved).await.unwrap();

        assert_eq!(again, Execution::Duplicate);
        assert_eq!(stock(&store, "iPhone15").await, 10);
        assert_eq!(stock(&store, "MacPro").await, 1);
    }

    #[tokio::test]
    async fn release_skips_unknown_products() {
        let store = store();
        let order = OrderId::new("ORD-5");
        store.reserve(&order, &items(&["iPhone15"])).await.unwrap();

        let execution = store
            .release(&order, &items(&["Ghost", "iPhone15"]))
            .await
            .unwrap();

        assert_eq!(execution, Execution::Applied);
        assert_eq!(stock(&store, "iPhone15").await, 10);
    }

    #[tokio::test]
    async fn release_without_reservation_changes_nothing() {
        let store = store();
        let order = OrderId::new("ORD-6");

        let execution = store.release(&order, &items(&["iPhone15"])).await.unwrap();

        assert_eq!(execution, Execution::Skipped);
        assert_eq!(stock(&store, "iPhone15").await, 10);
        assert!(
            !store
                .database()
                .has_idempotency_key(&release_key(&order))
                .await
                .unwrap()
        );

        // a failed reservation leaves nothing to release either
        let _ = store.reserve(&order, &items(&["Empty"])).await.unwrap_err();
        let execution = store.release(&order, &items(&["Empty"])).await.unwrap();
        assert_eq!(execution, Execution::Skipped);
        assert_eq!(stock(&store, "Empty").await, 0);
    }
}
