use chrono::{DateTime, Utc};
use common::ProductId;
use serde::{Deserialize, Serialize};

/// A catalog row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub stock: i64,
    pub price: i64,
}

impl Product {
    pub fn new(id: impl Into<ProductId>, name: impl Into<String>, stock: i64, price: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stock,
            price,
        }
    }
}

/// Proof that the action tagged `key` committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub created_at: DateTime<Utc>,
}

/// Products loaded into a fresh catalog for local runs and demos.
pub fn demo_catalog() -> Vec<Product> {
    vec![
        Product::new("iPhone15", "iPhone 15", 10, 8_000),
        Product::new("MacPro", "Mac Pro", 5, 20_000),
    ]
}
