//! PostgreSQL catalog tests against a shared container.
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::{OrderId, ProductId};
use inventory::{
    Database, Execution, InventoryError, InventoryReservationStore, PostgresDatabase, Product,
    reserve_key,
};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let pool = sqlx::PgPool::connect(&connection_string).await.unwrap();
            PostgresDatabase::new(pool.clone())
                .run_migrations()
                .await
                .unwrap();
            pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_db() -> PostgresDatabase {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products, idempotency_records")
        .execute(&pool)
        .await
        .unwrap();

    let db = PostgresDatabase::new(pool);
    for product in [
        Product::new("iPhone15", "iPhone 15", 10, 8_000),
        Product::new("MacPro", "Mac Pro", 0, 20_000),
    ] {
        db.upsert_product(&product).await.unwrap();
    }
    db
}

async fn stock(db: &PostgresDatabase, id: &str) -> i64 {
    db.product(&ProductId::new(id)).await.unwrap().unwrap().stock
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn reserve_is_idempotent_per_order() {
    let db = get_test_db().await;
    let store = InventoryReservationStore::new(db.clone());
    let order = OrderId::new("ORD-PG-1");
    let items = [ProductId::new("iPhone15")];

    assert_eq!(
        store.reserve(&order, &items).await.unwrap(),
        Execution::Applied
    );
    assert_eq!(
        store.reserve(&order, &items).await.unwrap(),
        Execution::Duplicate
    );
    assert_eq!(stock(&db, "iPhone15").await, 9);
    assert!(
        db.idempotency_record(&reserve_key(&order))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn out_of_stock_rolls_back_everything() {
    let db = get_test_db().await;
    let store = InventoryReservationStore::new(db.clone());
    let order = OrderId::new("ORD-PG-2");

    let result = store
        .reserve(
            &order,
            &[ProductId::new("iPhone15"), ProductId::new("MacPro")],
        )
        .await;

    assert!(matches!(result, Err(InventoryError::OutOfStock(_))));
    assert_eq!(stock(&db, "iPhone15").await, 10);
    assert!(
        db.idempotency_record(&reserve_key(&order))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn concurrent_reservations_respect_row_locks() {
    let db = get_test_db().await;
    let store = Arc::new(InventoryReservationStore::new(db.clone()));

    let orders: Vec<_> = (0..25)
        .map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .reserve(
                        &OrderId::new(format!("ORD-PG-C{i}")),
                        &[ProductId::new("iPhone15")],
                    )
                    .await
            })
        })
        .collect();

    let mut applied = 0;
    for order in orders {
        if order.await.unwrap().is_ok() {
            applied += 1;
        }
    }

    assert_eq!(applied, 10);
    assert_eq!(stock(&db, "iPhone15").await, 0);
}
