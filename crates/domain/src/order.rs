//! The order accepted for fulfillment.

use common::{CustomerId, OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Orders with an amount strictly above this wait for a human risk review.
pub const REVIEW_THRESHOLD: i64 = 10_000;

/// An order as handed to the fulfillment saga. Immutable once started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub amount: i64,
    /// One unit per entry; the same product may appear several times.
    pub items: Vec<ProductId>,
    pub customer_id: CustomerId,
}

impl Order {
    pub fn new(
        order_id: impl Into<OrderId>,
        amount: i64,
        items: impl IntoIterator<Item = ProductId>,
        customer_id: impl Into<CustomerId>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            amount,
            items: items.into_iter().collect(),
            customer_id: customer_id.into(),
        }
    }

    /// Checks the order is well formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.order_id.is_blank() {
            return Err(ValidationError::EmptyOrderId);
        }
        if self.amount < 0 {
            return Err(ValidationError::NegativeAmount(self.amount));
        }
        if self.items.is_empty() {
            return Err(ValidationError::NoItems);
        }
        if let Some(index) = self.items.iter().position(ProductId::is_blank) {
            return Err(ValidationError::EmptyProductId { index });
        }
        Ok(())
    }

    pub fn requires_review(&self) -> bool {
        self.amount > REVIEW_THRESHOLD
    }

    /// Counts the requested units per product, in first-seen order.
    pub fn quantities(&self) -> Vec<(ProductId, u32)> {
        let mut quantities: Vec<(ProductId, u32)> = Vec::new();
        for item in &self.items {
            match quantities.iter_mut().find(|(id, _)| id == item) {
                Some((_, count)) => *count += 1,
                None => quantities.push((item.clone(), 1)),
            }
        }
        quantities
    }
}
