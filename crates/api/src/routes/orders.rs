//! Order endpoints: admission, start, status and signals.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{CustomerId, OrderId, ProductId};
use domain::Order;
use event_store::EventStore;
use inventory::{Admission, AtomicStockLedger, Database, InventoryReservationStore};
use saga::{Delivery, InMemoryShippingService, OrderState, SagaCoordinator, TokioTimer};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

pub type Coordinator<S, D> =
    SagaCoordinator<S, InventoryReservationStore<D>, InMemoryShippingService, TokioTimer>;

/// Shared application state accessible from all handlers.
pub struct AppState<S, D> {
    pub coordinator: Coordinator<S, D>,
    pub ledger: AtomicStockLedger,
}

impl<S, D> AppState<S, D> {
    pub fn new(coordinator: Coordinator<S, D>, ledger: AtomicStockLedger) -> Self {
        Self {
            coordinator,
            ledger,
        }
    }
}

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub amount: i64,
    pub items: Vec<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PayRequest {
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AuditRequest {
    pub action: String,
}

// -- Response types --

#[derive(Debug, Serialize)]
pub struct OrderCreatedResponse {
    pub order_id: String,
}

#[derive(Debug, Serialize)]
pub struct OrderStatusResponse {
    pub order_id: String,
    pub status: OrderState,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub order_id: String,
    pub delivery: &'static str,
}

impl SignalResponse {
    fn new(order_id: OrderId, delivery: Delivery) -> Self {
        Self {
            order_id: order_id.to_string(),
            delivery: match delivery {
                Delivery::Accepted => "accepted",
                Delivery::Dropped => "dropped",
            },
        }
    }
}

// -- Handlers --

/// POST /api/v1/orders: admit the order through the flash-sale gate and start its saga.
#[tracing::instrument(skip(state, req), fields(amount = req.amount, items = req.items.len()))]
pub async fn create<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Json<OrderCreatedResponse>, ApiError>
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let order = Order::new(
        OrderId::new(format!("ORD-{}", uuid::Uuid::new_v4().simple())),
        req.amount,
        req.items.into_iter().map(ProductId::new),
        req.customer_id
            .map(CustomerId::new)
            .unwrap_or_else(|| CustomerId::new("guest")),
    );
    order.validate().map_err(saga::SagaError::from)?;

    let admitted = admit(&state.ledger, &order.quantities())?;
    let order_id = order.order_id.clone();

    if let Err(err) = state.coordinator.start_order(order).await {
        release(&state.ledger, &admitted);
        return Err(err.into());
    }

    tracing::info!(%order_id, "order accepted");
    Ok(Json(OrderCreatedResponse {
        order_id: order_id.to_string(),
    }))
}

/// GET /api/v1/orders/{id}: last committed status of an order.
#[tracing::instrument(skip(state))]
pub async fn status<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderStatusResponse>, ApiError>
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let status = state.coordinator.query_status(&parse_order_id(&id)?).await?;
    Ok(Json(OrderStatusResponse {
        order_id: status.order_id.to_string(),
        status: status.status,
        message: status.message,
    }))
}

/// POST /api/v1/orders/{id}/pay: deliver a payment confirmation.
#[tracing::instrument(skip(state, req))]
pub async fn pay<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(id): Path<String>,
    req: Option<Json<PayRequest>>,
) -> Result<Json<SignalResponse>, ApiError>
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let order_id = parse_order_id(&id)?;
    let reference = req
        .and_then(|Json(req)| req.reference)
        .unwrap_or_else(|| format!("PAY-{}", uuid::Uuid::new_v4().simple()));

    let delivery = state.coordinator.signal_payment(&order_id, reference).await?;
    Ok(Json(SignalResponse::new(order_id, delivery)))
}

/// POST /api/v1/orders/{id}/audit: deliver a risk review decision.
#[tracing::instrument(skip(state, req))]
pub async fn audit<S, D>(
    State(state): State<Arc<AppState<S, D>>>,
    Path(id): Path<String>,
    Json(req): Json<AuditRequest>,
) -> Result<Json<SignalResponse>, ApiError>
where
    S: EventStore + Clone + 'static,
    D: Database + 'static,
{
    let order_id = parse_order_id(&id)?;
    let delivery = state
        .coordinator
        .signal_admin_action(&order_id, &req.action)
        .await?;
    Ok(Json(SignalResponse::new(order_id, delivery)))
}

/// Takes flash-sale units for every gated product, all or nothing.
///
/// Products that were never preheated are not gated.
fn admit(
    ledger: &AtomicStockLedger,
    quantities: &[(ProductId, u32)],
) -> Result<Vec<(ProductId, u32)>, ApiError> {
    let mut admitted = Vec::new();
    for (product_id, quantity) in quantities {
        if !ledger.is_open(product_id) {
            continue;
        }
        match ledger.try_reserve(product_id, *quantity) {
            Admission::Admitted => admitted.push((product_id.clone(), *quantity)),
            rejected => {
                release(ledger, &admitted);
                tracing::info!(%product_id, admission = rejected.as_str(), "order not admitted");
                return Err(ApiError::AdmissionRejected {
                    product_id: product_id.clone(),
                    admission: rejected,
                });
            }
        }
    }
    Ok(admitted)
}

fn release(ledger: &AtomicStockLedger, admitted: &[(ProductId, u32)]) {
    for (product_id, quantity) in admitted {
        ledger.rollback(product_id, *quantity);
    }
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(ApiError::BadRequest("order id must not be empty".to_string()));
    }
    Ok(OrderId::new(id))
}
