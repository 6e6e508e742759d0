//! Shipping service trait and in-memory implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::ShipmentId;
use dashmap::{DashMap, DashSet};
use domain::Shipment;

use crate::error::SagaError;

/// Trait for shipping operations.
#[async_trait]
pub trait ShippingService: Send + Sync {
    /// Generates a shipping label for one package, returning its tracking number.
    async fn generate_label(&self, shipment: &Shipment) -> Result<String, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryShippingState {
    labels: DashMap<ShipmentId, String>,
    failing_warehouses: DashSet<String>,
    calls: AtomicUsize,
}

/// In-memory shipping service for testing and the demo binary.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShippingService {
    state: Arc<InMemoryShippingState>,
}

impl InMemoryShippingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes label generation fail for every package of `warehouse`.
    pub fn set_fail_for_warehouse(&self, warehouse: impl Into<String>, fail: bool) {
        let warehouse = warehouse.into();
        if fail {
            self.state.failing_warehouses.insert(warehouse);
        } else {
            self.state.failing_warehouses.remove(&warehouse);
        }
    }

    /// Number of labels issued.
    pub fn label_count(&self) -> usize {
        self.state.labels.len()
    }

    pub fn label_for(&self, shipment_id: &ShipmentId) -> Option<String> {
        self.state
            .labels
            .get(shipment_id)
            .map(|label| label.value().clone())
    }

    /// Number of generate_label calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ShippingService for InMemoryShippingService {
    async fn generate_label(&self, shipment: &Shipment) -> Result<String, SagaError> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);

        if self.state.failing_warehouses.contains(&shipment.warehouse) {
            return Err(SagaError::ShippingService(format!(
                "warehouse {} is not accepting shipments",
                shipment.warehouse
            )));
        }

        let tracking_number = format!(
            "SF-{}-{}",
            shipment.warehouse,
            Utc::now().timestamp_millis()
        );
        self.state
            .labels
            .insert(shipment.shipment_id.clone(), tracking_number.clone());

        tracing::info!(
            shipment_id = %shipment.shipment_id,
            warehouse = %shipment.warehouse,
            items = shipment.items.len(),
            %tracking_number,
            "shipping label generated"
        );
        Ok(tracking_number)
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, ProductId};

    use super::*;

    fn shipment(warehouse: &str) -> Shipment {
        Shipment {
            shipment_id: ShipmentId::new(format!("ORD-1-{warehouse}")),
            order_id: OrderId::new("ORD-1"),
            warehouse: warehouse.to_string(),
            items: vec![ProductId::new("iPhone15")],
        }
    }

    #[tokio::test]
    async fn test_generate_label() {
        let service = InMemoryShippingService::new();

        let label = service.generate_label(&shipment("WH-01")).await.unwrap();
        assert!(label.starts_with("SF-WH-01-"));
        assert_eq!(service.label_count(), 1);
        assert_eq!(
            service.label_for(&ShipmentId::new("ORD-1-WH-01")),
            Some(label)
        );
    }

    #[tokio::test]
    async fn test_fail_for_warehouse() {
        let service = InMemoryShippingService::new();
        service.set_fail_for_warehouse("WH-02", true);

        assert!(service.generate_label(&shipment("WH-01")).await.is_ok());
        let err = service.generate_label(&shipment("WH-02")).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(service.label_count(), 1);
        assert_eq!(service.calls(), 2);

        service.set_fail_for_warehouse("WH-02", false);
        assert!(service.generate_label(&shipment("WH-02")).await.is_ok());
    }
}
