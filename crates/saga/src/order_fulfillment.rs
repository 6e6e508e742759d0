//! Order fulfillment saga constants and settings.

use std::time::Duration;

use common::{OrderId, ShipmentId, StreamId};

use crate::retry::RetryPolicy;

/// Stream type of order fulfillment journals.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Stream type of shipment child journals.
pub const CHILD_TYPE: &str = "ShippingChild";

/// Step name: Reserve inventory for the order.
pub const STEP_RESERVE_INVENTORY: &str = "reserve_inventory";

/// Step name: Give reserved inventory back.
pub const STEP_RELEASE_INVENTORY: &str = "release_inventory";

/// Step name: Generate the label of one package.
pub const STEP_GENERATE_LABEL: &str = "generate_shipping_label";

/// Step name: Write one event to the saga journal.
pub const STEP_JOURNAL_APPEND: &str = "journal_append";

/// How long an order waits in AWAITING_PAYMENT.
pub const PAYMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Warehouses packages are split across, in package order.
pub const WAREHOUSES: [&str; 2] = ["WH-01", "WH-02"];

pub fn saga_stream_id(order_id: &OrderId) -> StreamId {
    StreamId::new(format!("order-fulfillment-{order_id}"))
}

pub fn child_stream_id(shipment_id: &ShipmentId) -> StreamId {
    StreamId::new(format!("shipping:{shipment_id}"))
}

/// Tunables shared by every saga of a coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaConfig {
    pub payment_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            payment_timeout: PAYMENT_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids() {
        assert_eq!(
            saga_stream_id(&OrderId::new("ORD-7")).as_str(),
            "order-fulfillment-ORD-7"
        );
        assert_eq!(
            child_stream_id(&ShipmentId::new("ORD-7-S2")).as_str(),
            "shipping:ORD-7-S2"
        );
    }
}
