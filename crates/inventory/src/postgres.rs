use async_trait::async_trait;
use common::ProductId;
use sqlx::{PgPool, Postgres, Row, postgres::PgRow};

use crate::{
    IdempotencyRecord, Product,
    db::{Database, Transaction},
    error::StoreError,
};

/// PostgreSQL catalog. Row locks come from `SELECT ... FOR UPDATE`, key
/// uniqueness from the primary key of `idempotency_records`.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: PgPool,
}

impl PostgresDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_product(row: PgRow) -> Result<Product, StoreError> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            stock: row.try_get("stock")?,
            price: row.try_get("price")?,
        })
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn product(&self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        sqlx::query("SELECT id, name, stock, price FROM products WHERE id = $1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?
            .map(Self::row_to_product)
            .transpose()
    }

    async fn upsert_product(&self, product: &Product) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, stock, price)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                stock = EXCLUDED.stock,
                price = EXCLUDED.price
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(product.stock)
        .bind(product.price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn idempotency_record(
        &self,
        key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let row = sqlx::query("SELECT key, created_at FROM idempotency_records WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(IdempotencyRecord {
                key: row.try_get("key")?,
                created_at: row.try_get("created_at")?,
            })),
            None => Ok(None),
        }
    }
}

/// Transaction over [`PostgresDatabase`].
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn insert_idempotency_key(&mut self, key: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO idempotency_records (key, created_at) VALUES ($1, NOW())")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                    StoreError::UniqueViolation(key.to_string())
                }
                e => StoreError::Database(e),
            })?;
        Ok(())
    }

    async fn lock_product(&mut self, id: &ProductId) -> Result<Option<Product>, StoreError> {
        sqlx::query("SELECT id, name, stock, price FROM products WHERE id = $1 FOR UPDATE")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await?
            .map(PostgresDatabase::row_to_product)
            .transpose()
    }

    async fn update_stock(&mut self, id: &ProductId, stock: i64) -> Result<(), StoreError> {
        sqlx::query("UPDATE products SET stock = $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(stock)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn increment_stock(&mut self, id: &ProductId, delta: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE products SET stock = stock + $2 WHERE id = $1")
            .bind(id.as_str())
            .bind(delta)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
