use common::{OrderId, ProductId, ShipmentId};
use serde::{Deserialize, Serialize};

/// One package of an order, shipped from a single warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_id: ShipmentId,
    pub order_id: OrderId,
    pub warehouse: String,
    pub items: Vec<ProductId>,
}
