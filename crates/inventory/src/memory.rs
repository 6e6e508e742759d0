//! In-memory catalog with row locks and transactional rollback.
//!
//! Each product row and each idempotency key sits behind its own async
//! mutex. A transaction keeps the guards of everything it touched until it
//! commits or rolls back, which gives the same blocking behavior as
//! `SELECT ... FOR UPDATE` and a unique index on the key column.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::ProductId;
use dashmap::{DashMap, mapref::entry::Entry};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    IdempotencyRecord, Product,
    db::{Database, Transaction},
    error::StoreError,
};

type KeySlot = Option<IdempotencyRecord>;

#[derive(Default)]
struct Tables {
    products: DashMap<ProductId, Arc<Mutex<Product>>>,
    keys: DashMap<String, Arc<Mutex<KeySlot>>>,
}

/// In-memory [`Database`]. Clones share the same tables.
#[derive(Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<Tables>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a catalog preloaded with `products`.
    pub fn with_products(products: impl IntoIterator<Item = Product>) -> Self {
        let db = Self::new();
        for product in products {
            db.tables
                .products
                .insert(product.id.clone(), Arc::new(Mutex::new(product)));
        }
        db
    }
}

#[async_trait]
impl Database for InMemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            rows: Vec::new(),
            keys: Vec::new(),
            finished: false,
        }))
    }

    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        let Some(row) = self
            .tables
            .products
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(None);
        };
        let product = row.lock().await.clone();
        Ok(Some(product))
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        let existing = match self.tables.products.entry(product.id.clone()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(Mutex::new(product.clone())));
                return Ok(());
            }
        };
        *existing.lock().await = product.clone();
        Ok(())
    }

    async fn idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let Some(slot) = self
            .tables
            .keys
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return Ok(None);
        };
        let record = slot.lock().await.clone();
        Ok(record)
    }
}

struct LockedRow {
    guard: OwnedMutexGuard<Product>,
    stock_before: i64,
}

struct ClaimedKey {
    key: String,
    guard: OwnedMutexGuard<KeySlot>,
}

/// Transaction over [`InMemoryDatabase`].
///
/// Writes go straight to the locked rows; rollback, or dropping the
/// transaction uncommitted, restores the values seen when each row was locked.
pub struct InMemoryTransaction {
    tables: Arc<Tables>,
    rows: Vec<LockedRow>,
    keys: Vec<ClaimedKey>,
    finished: bool,
}

impl InMemoryTransaction {
    fn locked_row(&mut self, id: &ProductId) -> Option<&mut LockedRow> {
        self.rows.iter_mut().find(|row| &row.guard.id == id)
    }

    async fn lock_row(&mut self, id: &ProductId) -> Option<&mut LockedRow> {
        if self.locked_row(id).is_none() {
            let cell = self
                .tables
                .products
                .get(id)
                .map(|entry| Arc::clone(entry.value()))?;
            let guard = cell.lock_owned().await;
            let stock_before = guard.stock;
            self.rows.push(LockedRow {
                guard,
                stock_before,
            });
        }
        self.locked_row(id)
    }

    fn restore(&mut self) {
        for row in &mut self.rows {
            row.guard.stock = row.stock_before;
        }
        for ClaimedKey { key, guard } in std::mem::take(&mut self.keys) {
            drop(guard);
            // a slot another transaction is waiting on must stay shared
            self.tables.keys.remove_if(&key, |_, slot| {
                Arc::strong_count(slot) == 1 && slot.try_lock().is_ok_and(|slot| slot.is_none())
            });
        }
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn insert_idempotency_key(&mut self, key: &str) -> Result<(), StoreError> {
        if self.keys.iter().any(|claimed| claimed.key == key) {
            return Err(StoreError::UniqueViolation(key.to_string()));
        }

        let slot = Arc::clone(self.tables.keys.entry(key.to_string()).or_default().value());
        let guard = slot.lock_owned().await;
        if guard.is_some() {
            return Err(StoreError::UniqueViolation(key.to_string()));
        }

        self.keys.push(ClaimedKey {
            key: key.to_string(),
            guard,
        });
        Ok(())
    }

    async fn lock_product(&mut self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        Ok(self
            .lock_row(id)
            .await
            .map(|row| Product::clone(&row.guard)))
    }

    async fn update_stock(&mut self, id: &ProductId, stock: i64) -> Result<(), StoreError> {
        if let Some(row) = self.lock_row(id).await {
            row.guard.stock = stock;
        }
        Ok(())
    }

    async fn increment_stock(&mut self, id: &ProductId, delta: i64) -> Result<bool, StoreError> {
        match self.lock_row(id).await {
            Some(row) => {
                row.guard.stock += delta;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        let created_at = Utc::now();
        for claimed in &mut tx.keys {
            *claimed.guard = Some(IdempotencyRecord {
                key: claimed.key.clone(),
                created_at,
            });
        }
        tx.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let mut tx = self;
        tx.restore();
        tx.finished = true;
        Ok(())
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if !self.finished {
            self.restore();
        }
    }
}
