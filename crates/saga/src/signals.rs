//! External signals routed to waiting sagas.
//!
//! A saga opens a [`SignalWindow`] before it publishes a waiting status and
//! keeps it until it leaves that status. Signals arriving while no matching
//! window is open are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use common::OrderId;
use dashmap::DashMap;
use domain::AdminAction;
use tokio::sync::mpsc;

/// An asynchronous input addressed to one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    AdminAction(AdminAction),
    PaymentPaid { reference: String },
}

impl Signal {
    pub fn wait_point(&self) -> WaitPoint {
        match self {
            Signal::AdminAction(_) => WaitPoint::AdminReview,
            Signal::PaymentPaid { .. } => WaitPoint::Payment,
        }
    }
}

/// Where a saga suspends for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    AdminReview,
    Payment,
}

/// Acknowledgement of a signal delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued for the saga waiting on it.
    Accepted,
    /// No matching wait point was open.
    Dropped,
}

#[derive(Debug)]
struct Window {
    id: u64,
    point: WaitPoint,
    sender: mpsc::UnboundedSender<Signal>,
}

/// Routing table from order to its open wait point.
#[derive(Debug, Clone, Default)]
pub struct SignalBus {
    windows: Arc<DashMap<OrderId, Window>>,
    next_id: Arc<AtomicU64>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the wait point of an order, replacing any previous one.
    pub fn open(&self, order_id: &OrderId, point: WaitPoint) -> SignalWindow {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.windows
            .insert(order_id.clone(), Window { id, point, sender });
        SignalWindow {
            bus: self.clone(),
            order_id: order_id.clone(),
            id,
            point,
            receiver,
        }
    }

    pub fn deliver(&self, order_id: &OrderId, signal: Signal) -> Delivery {
        let Some(window) = self.windows.get(order_id) else {
            tracing::debug!(%order_id, ?signal, "no wait point open, signal dropped");
            return Delivery::Dropped;
        };
        if window.point != signal.wait_point() {
            tracing::debug!(
                %order_id,
                ?signal,
                waiting_for = ?window.point,
                "signal does not match the open wait point, dropped"
            );
            return Delivery::Dropped;
        }
        match window.sender.send(signal) {
            Ok(()) => Delivery::Accepted,
            Err(_) => Delivery::Dropped,
        }
    }

    pub fn is_open(&self, order_id: &OrderId, point: WaitPoint) -> bool {
        self.windows
            .get(order_id)
            .is_some_and(|window| window.point == point)
    }
}

/// Receiving end of an open wait point. Closes the window on drop.
#[derive(Debug)]
pub struct SignalWindow {
    bus: SignalBus,
    order_id: OrderId,
    id: u64,
    point: WaitPoint,
    receiver: mpsc::UnboundedReceiver<Signal>,
}

impl SignalWindow {
    pub fn point(&self) -> WaitPoint {
        self.point
    }

    /// Next admin decision, or None once the window was superseded.
    pub async fn recv_admin_action(&mut self) -> Option<AdminAction> {
        loop {
            match self.receiver.recv().await? {
                Signal::AdminAction(action) => return Some(action),
                other => tracing::debug!(order_id = %self.order_id, ?other, "ignoring signal"),
            }
        }
    }

    /// Next payment reference, or None once the window was superseded.
    pub async fn recv_payment(&mut self) -> Option<String> {
        loop {
            match self.receiver.recv().await? {
                Signal::PaymentPaid { reference } => return Some(reference),
                other => tracing::debug!(order_id = %self.order_id, ?other, "ignoring signal"),
            }
        }
    }
}

impl Drop for SignalWindow {
    fn drop(&mut self) {
        self.bus
            .windows
            .remove_if(&self.order_id, |_, window| window.id == self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order() -> OrderId {
        OrderId::new("ORD-1")
    }

    #[tokio::test]
    async fn delivers_to_matching_window() {
        let bus = SignalBus::new();
        let mut window = bus.open(&order(), WaitPoint::Payment);

        let delivery = bus.deliver(
            &order(),
            Signal::PaymentPaid {
                reference: "PAY-1".into(),
            },
        );
        assert_eq!(delivery, Delivery::Accepted);
        assert_eq!(window.recv_payment().await.as_deref(), Some("PAY-1"));
    }

    #[test]
    fn drops_without_window() {
        let bus = SignalBus::new();
        let delivery = bus.deliver(&order(), Signal::AdminAction(AdminAction::Approve));
        assert_eq!(delivery, Delivery::Dropped);
    }

    #[test]
    fn drops_signal_for_other_wait_point() {
        let bus = SignalBus::new();
        let _window = bus.open(&order(), WaitPoint::AdminReview);

        let delivery = bus.deliver(
            &order(),
            Signal::PaymentPaid {
                reference: "PAY-1".into(),
            },
        );
        assert_eq!(delivery, Delivery::Dropped);
    }

    #[test]
    fn closing_window_stops_delivery() {
        let bus = SignalBus::new();
        let window = bus.open(&order(), WaitPoint::AdminReview);
        assert!(bus.is_open(&order(), WaitPoint::AdminReview));

        drop(window);
        assert!(!bus.is_open(&order(), WaitPoint::AdminReview));
        assert_eq!(
            bus.deliver(&order(), Signal::AdminAction(AdminAction::Reject)),
            Delivery::Dropped
        );
    }

    #[tokio::test]
    async fn superseded_window_does_not_close_its_successor() {
        let bus = SignalBus::new();
        let review = bus.open(&order(), WaitPoint::AdminReview);
        let mut payment = bus.open(&order(), WaitPoint::Payment);

        drop(review);
        assert!(bus.is_open(&order(), WaitPoint::Payment));
        assert_eq!(
            bus.deliver(
                &order(),
                Signal::PaymentPaid {
                    reference: "PAY-2".into()
                }
            ),
            Delivery::Accepted
        );
        assert_eq!(payment.recv_payment().await.as_deref(), Some("PAY-2"));
    }
}
