//! Lock-free publication of the last committed order status.

use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::sync::Notify;

use crate::state::OrderStatus;

/// Single-writer, many-reader status cell.
///
/// The saga publishes after each durable commit; readers load the current
/// value without ever waiting on the writer.
#[derive(Debug)]
pub struct StatusCell {
    current: ArcSwap<OrderStatus>,
    changed: Notify,
}

impl StatusCell {
    pub fn new(status: OrderStatus) -> Self {
        Self {
            current: ArcSwap::from_pointee(status),
            changed: Notify::new(),
        }
    }

    pub fn load(&self) -> OrderStatus {
        OrderStatus::clone(&self.current.load())
    }

    pub(crate) fn publish(&self, status: OrderStatus) {
        if *self.current.load_full() == status {
            return;
        }
        self.current.store(Arc::new(status));
        self.changed.notify_waiters();
    }

    /// Waits until the published status satisfies `predicate`.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&OrderStatus) -> bool) -> OrderStatus {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let current = self.load();
            if predicate(&current) {
                return current;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use common::OrderId;

    use super::*;
    use crate::state::OrderState;

    #[tokio::test]
    async fn waiters_see_later_publication() {
        let cell = Arc::new(StatusCell::new(OrderStatus::new(
            OrderId::new("ORD-1"),
            OrderState::Initializing,
            "",
        )));

        let waiter = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.wait_for(|s| s.status.is_terminal()).await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        cell.publish(OrderStatus::new(
            OrderId::new("ORD-1"),
            OrderState::Reserving,
            "",
        ));
        cell.publish(OrderStatus::new(
            OrderId::new("ORD-1"),
            OrderState::Completed,
            "done",
        ));

        let seen = waiter.await.unwrap();
        assert_eq!(seen.status, OrderState::Completed);
        assert_eq!(cell.load().message, "done");
    }
}
