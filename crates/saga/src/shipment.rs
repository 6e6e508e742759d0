//! Splitting an order into packages shipped by independent child processes.

use std::sync::Arc;

use common::{ShipmentId, StreamId};
use domain::{Aggregate, DomainEvent, Order, Shipment};
use event_store::{EventStore, Version};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::error::{Result, SagaError};
use crate::journal;
use crate::order_fulfillment::{CHILD_TYPE, STEP_GENERATE_LABEL, WAREHOUSES, child_stream_id};
use crate::retry::{RetryPolicy, retry_step};
use crate::services::ShippingService;

/// Splits an order into exactly two packages.
///
/// The first `ceil(n/2)` items go to the first warehouse and the rest to the
/// second. A single-item order yields an empty second package.
pub fn plan_shipments(order: &Order) -> Vec<Shipment> {
    let split = order.items.len().div_ceil(2);
    let (first, second) = order.items.split_at(split);

    [first, second]
        .into_iter()
        .zip(WAREHOUSES)
        .enumerate()
        .map(|(index, (items, warehouse))| Shipment {
            shipment_id: ShipmentId::new(format!("{}-S{}", order.order_id, index + 1)),
            order_id: order.order_id.clone(),
            warehouse: warehouse.to_string(),
            items: items.to_vec(),
        })
        .collect()
}

/// Events of one shipment child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ShipmentEvent {
    ChildStarted(ChildStartedData),
    LabelGenerated(LabelGeneratedData),
    ChildFailed(ChildFailedData),
}

impl DomainEvent for ShipmentEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ShipmentEvent::ChildStarted(_) => "ChildStarted",
            ShipmentEvent::LabelGenerated(_) => "LabelGenerated",
            ShipmentEvent::ChildFailed(_) => "ChildFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildStartedData {
    pub shipment: Shipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelGeneratedData {
    pub tracking_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildFailedData {
    pub error: String,
}

/// Replayed state of a shipment child.
#[derive(Debug, Clone, Default)]
pub struct ShipmentChild {
    id: Option<StreamId>,
    version: Version,
    shipment: Option<Shipment>,
    tracking_number: Option<String>,
    error: Option<String>,
}

impl Aggregate for ShipmentChild {
    type Event = ShipmentEvent;

    fn stream_type() -> &'static str {
        CHILD_TYPE
    }

    fn stream_id(&self) -> Option<StreamId> {
        self.id.clone()
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ShipmentEvent::ChildStarted(data) => {
                self.id = Some(child_stream_id(&data.shipment.shipment_id));
                self.shipment = Some(data.shipment);
            }
            ShipmentEvent::LabelGenerated(data) => {
                self.tracking_number = Some(data.tracking_number);
            }
            ShipmentEvent::ChildFailed(data) => {
                self.error = Some(data.error);
            }
        }
    }
}

impl ShipmentChild {
    pub fn shipment(&self) -> Option<&Shipment> {
        self.shipment.as_ref()
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

/// Runs one child process per package and joins them.
pub struct ShipmentSplitter<S, Sh> {
    store: S,
    shipping: Arc<Sh>,
    retry: RetryPolicy,
}

impl<S, Sh> ShipmentSplitter<S, Sh>
where
    S: EventStore + Clone + 'static,
    Sh: ShippingService + 'static,
{
    pub fn new(store: S, shipping: Arc<Sh>, retry: RetryPolicy) -> Self {
        Self {
            store,
            shipping,
            retry,
        }
    }

    /// Runs every shipment concurrently and waits for all of them.
    ///
    /// Results come back in the order of `shipments`. A failing child does
    /// not cancel its siblings.
    pub async fn run_all(&self, shipments: Vec<Shipment>) -> Vec<(ShipmentId, Result<String>)> {
        let (ids, children): (Vec<_>, Vec<_>) = shipments
            .into_iter()
            .map(|shipment| {
                let id = shipment.shipment_id.clone();
                let span = tracing::info_span!("shipment_child", shipment_id = %id);
                let child = run_child(
                    self.store.clone(),
                    self.shipping.clone(),
                    self.retry.clone(),
                    shipment,
                );
                (id, tokio::spawn(child.instrument(span)))
            })
            .unzip();

        let joined = join_all(children).await;

        ids.into_iter()
            .zip(joined)
            .map(|(id, result)| {
                let outcome = result.unwrap_or_else(|err| {
                    Err(SagaError::ChildAborted {
                        child: child_stream_id(&id),
                        reason: err.to_string(),
                    })
                });
                (id, outcome)
            })
            .collect()
    }
}

/// One shipment child: journal, label, journal.
///
/// A child that already recorded its outcome returns it without calling the
/// shipping service again.
async fn run_child<S, Sh>(
    store: S,
    shipping: Arc<Sh>,
    retry: RetryPolicy,
    shipment: Shipment,
) -> Result<String>
where
    S: EventStore,
    Sh: ShippingService + ?Sized,
{
    let stream_id = child_stream_id(&shipment.shipment_id);
    let mut child = journal::load::<_, ShipmentChild>(&store, &stream_id)
        .await?
        .unwrap_or_default();

    if let Some(tracking_number) = child.tracking_number() {
        tracing::debug!("label already generated");
        return Ok(tracking_number.to_string());
    }
    if let Some(error) = child.error() {
        return Err(SagaError::ShippingService(error.to_string()));
    }

    if child.shipment().is_none() {
        let started = ShipmentEvent::ChildStarted(ChildStartedData {
            shipment: shipment.clone(),
        });
        record(&store, &stream_id, &mut child, started).await?;
    }

    match retry_step(STEP_GENERATE_LABEL, &retry, || shipping.generate_label(&shipment)).await {
        Ok(tracking_number) => {
            let labeled = ShipmentEvent::LabelGenerated(LabelGeneratedData {
                tracking_number: tracking_number.clone(),
            });
            record(&store, &stream_id, &mut child, labeled).await?;
            Ok(tracking_number)
        }
        Err(err) => {
            tracing::warn!(error = %err, "shipment child failed");
            let failed = ShipmentEvent::ChildFailed(ChildFailedData {
                error: err.to_string(),
            });
            record(&store, &stream_id, &mut child, failed).await?;
            Err(err)
        }
    }
}

async fn record<S: EventStore>(
    store: &S,
    stream_id: &StreamId,
    child: &mut ShipmentChild,
    event: ShipmentEvent,
) -> Result<()> {
    let version =
        journal::append(store, stream_id, ShipmentChild::stream_type(), child.version(), &event)
            .await?;
    child.apply(event);
    child.set_version(version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use common::ProductId;
    use event_store::InMemoryEventStore;

    use super::*;
    use crate::services::InMemoryShippingService;

    fn order(items: &[&str]) -> Order {
        Order::new(
            "ORD-1",
            100,
            items.iter().map(|item| ProductId::new(*item)),
            "cust-1",
        )
    }

    #[test]
    fn splits_items_across_two_warehouses() {
        let shipments = plan_shipments(&order(&["a", "b", "c"]));

        assert_eq!(shipments.len(), 2);
        assert_eq!(shipments[0].shipment_id, ShipmentId::new("ORD-1-S1"));
        assert_eq!(shipments[0].warehouse, "WH-01");
        assert_eq!(
            shipments[0].items,
            vec![ProductId::new("a"), ProductId::new("b")]
        );
        assert_eq!(shipments[1].shipment_id, ShipmentId::new("ORD-1-S2"));
        assert_eq!(shipments[1].warehouse, "WH-02");
        assert_eq!(shipments[1].items, vec![ProductId::new("c")]);
    }

    #[test]
    fn single_item_order_gets_an_empty_second_package() {
        let shipments = plan_shipments(&order(&["a"]));

        assert_eq!(shipments.len(), 2);
        assert_eq!(shipments[0].items, vec![ProductId::new("a")]);
        assert!(shipments[1].items.is_empty());
    }

    #[tokio::test]
    async fn children_journal_their_labels() {
        let store = InMemoryEventStore::new();
        let shipping = Arc::new(InMemoryShippingService::new());
        let splitter =
            ShipmentSplitter::new(store.clone(), shipping.clone(), RetryPolicy::immediate(3));

        let results = splitter.run_all(plan_shipments(&order(&["a", "b"]))).await;

        assert_eq!(results.len(), 2);
        for (id, result) in &results {
            let label = result.as_ref().unwrap();
            assert_eq!(shipping.label_for(id).as_ref(), Some(label));

            let events = store.read_stream(&child_stream_id(id)).await.unwrap();
            let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
            assert_eq!(types, ["ChildStarted", "LabelGenerated"]);
            assert!(events.iter().all(|e| e.stream_type == CHILD_TYPE));
        }
    }

    #[tokio::test]
    async fn rerun_reuses_recorded_labels() {
        let store = InMemoryEventStore::new();
        let shipping = Arc::new(InMemoryShippingService::new());
        let splitter =
            ShipmentSplitter::new(store.clone(), shipping.clone(), RetryPolicy::immediate(3));
        let shipments = plan_shipments(&order(&["a", "b"]));

        let first = splitter.run_all(shipments.clone()).await;
        let second = splitter.run_all(shipments).await;

        assert_eq!(shipping.calls(), 2);
        for ((_, a), (_, b)) in first.iter().zip(&second) {
            assert_eq!(a.as_ref().unwrap(), b.as_ref().unwrap());
        }
    }

    #[tokio::test]
    async fn one_failing_child_does_not_stop_the_other() {
        let store = InMemoryEventStore::new();
        let shipping = Arc::new(InMemoryShippingService::new());
        shipping.set_fail_for_warehouse("WH-02", true);
        let splitter =
            ShipmentSplitter::new(store.clone(), shipping.clone(), RetryPolicy::immediate(3));

        let results = splitter.run_all(plan_shipments(&order(&["a", "b"]))).await;

        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(SagaError::ShippingService(_))));
        // three attempts for the failing child, one for the healthy one
        assert_eq!(shipping.calls(), 4);

        let failed = store
            .read_stream(&child_stream_id(&results[1].0))
            .await
            .unwrap();
        assert_eq!(failed.last().unwrap().event_type, "ChildFailed");
    }
}
