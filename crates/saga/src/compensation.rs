//! Undo actions registered by committed steps.

use common::{OrderId, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::order_fulfillment::STEP_RELEASE_INVENTORY;
use crate::services::InventoryService;

/// A recorded undo. Serializable so the stack survives replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Compensation {
    /// Put the units reserved for an order back into stock.
    ReleaseInventory {
        order_id: OrderId,
        items: Vec<ProductId>,
    },
}

impl Compensation {
    pub fn step_name(&self) -> &'static str {
        match self {
            Compensation::ReleaseInventory { .. } => STEP_RELEASE_INVENTORY,
        }
    }

    /// Runs the undo against its service.
    pub async fn run<I: InventoryService + ?Sized>(&self, inventory: &I) -> Result<()> {
        match self {
            Compensation::ReleaseInventory { order_id, items } => {
                inventory.release(order_id, items).await
            }
        }
    }
}

/// LIFO stack of undo actions for one saga.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationStack {
    entries: Vec<Compensation>,
}

impl CompensationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, compensation: Compensation) {
        self.entries.push(compensation);
    }

    pub fn pop(&mut self) -> Option<Compensation> {
        self.entries.pop()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in the order they must run: most recent first.
    pub fn unwind_order(&self) -> impl Iterator<Item = &Compensation> {
        self.entries.iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(order: &str) -> Compensation {
        Compensation::ReleaseInventory {
            order_id: OrderId::new(order),
            items: vec![ProductId::new("iPhone15")],
        }
    }

    #[test]
    fn unwinds_most_recent_first() {
        let mut stack = CompensationStack::new();
        stack.push(release("A"));
        stack.push(release("B"));
        stack.push(release("C"));

        let order: Vec<_> = stack.unwind_order().cloned().collect();
        assert_eq!(order, vec![release("C"), release("B"), release("A")]);
        assert_eq!(stack.len(), 3);
    }

    #[test]
    fn pop_follows_unwind_order() {
        let mut stack = CompensationStack::new();
        stack.push(release("A"));
        stack.push(release("B"));

        assert_eq!(stack.pop(), Some(release("B")));
        assert_eq!(stack.pop(), Some(release("A")));
        assert_eq!(stack.pop(), None);
        assert!(stack.is_empty());
    }

    #[test]
    fn serializes_as_kind_and_payload() {
        let json = serde_json::to_value(release("ORD-9")).unwrap();
        assert_eq!(json["kind"], "release_inventory");
        assert_eq!(json["payload"]["order_id"], "ORD-9");
        assert_eq!(json["payload"]["items"][0], "iPhone15");
    }
}
