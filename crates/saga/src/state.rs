//! Order status state machine.

use common::OrderId;
use serde::{Deserialize, Serialize};

use crate::signals::WaitPoint;

/// Lifecycle of an order inside the fulfillment saga.
///
/// ```text
/// INITIALIZING ──► RESERVING ──┬──► AWAITING_REVIEW ──┬──► AWAITING_PAYMENT ──┬──► SHIPPING ──┬──► COMPLETED
///                              │                      └──► REJECTED           └──► CANCELLED  └──► FAILED
///                              ├──► AWAITING_PAYMENT
///                              └──► FAILED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    #[default]
    Initializing,
    Reserving,
    AwaitingReview,
    AwaitingPayment,
    Shipping,
    Completed,
    Rejected,
    Cancelled,
    Failed,
}

impl OrderState {
    pub fn can_transition_to(&self, next: OrderState) -> bool {
        use OrderState::*;
        matches!(
            (self, next),
            (Initializing, Reserving)
                | (Reserving, AwaitingReview | AwaitingPayment | Failed)
                | (AwaitingReview, AwaitingPayment | Rejected)
                | (AwaitingPayment, Shipping | Cancelled)
                | (Shipping, Completed | Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Completed
                | OrderState::Rejected
                | OrderState::Cancelled
                | OrderState::Failed
        )
    }

    /// The signal wait point this state suspends at, if any.
    pub fn wait_point(&self) -> Option<WaitPoint> {
        match self {
            OrderState::AwaitingReview => Some(WaitPoint::AdminReview),
            OrderState::AwaitingPayment => Some(WaitPoint::Payment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Initializing => "INITIALIZING",
            OrderState::Reserving => "RESERVING",
            OrderState::AwaitingReview => "AWAITING_REVIEW",
            OrderState::AwaitingPayment => "AWAITING_PAYMENT",
            OrderState::Shipping => "SHIPPING",
            OrderState::Completed => "COMPLETED",
            OrderState::Rejected => "REJECTED",
            OrderState::Cancelled => "CANCELLED",
            OrderState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last committed status of an order, as seen by queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: OrderId,
    pub status: OrderState,
    pub message: String,
}

impl OrderStatus {
    pub fn new(order_id: OrderId, status: OrderState, message: impl Into<String>) -> Self {
        Self {
            order_id,
            status,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
