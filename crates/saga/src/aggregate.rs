//! Saga instance aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::{OrderId, ShipmentId, StreamId};
use domain::{AdminAction, Aggregate, Order, Shipment};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::compensation::CompensationStack;
use crate::events::SagaEvent;
use crate::order_fulfillment::{SAGA_TYPE, saga_stream_id};
use crate::state::{OrderState, OrderStatus};

/// Outcome reported by a shipment child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShipmentOutcome {
    Labeled { tracking_number: String },
    Failed { error: String },
}

/// An event-sourced order fulfillment saga.
///
/// Everything the saga decided or received is folded in here, so replaying
/// the journal puts a resumed saga exactly where the previous run stopped.
#[derive(Debug, Clone, Default)]
pub struct SagaInstance {
    id: Option<StreamId>,
    version: Version,
    order: Option<Order>,
    state: OrderState,
    message: String,
    completed_steps: Vec<String>,
    compensations: CompensationStack,
    failure_reason: Option<String>,
    admin_action: Option<AdminAction>,
    payment_reference: Option<String>,
    payment_deadline: Option<DateTime<Utc>>,
    payment_timed_out: bool,
    shipments: Vec<Shipment>,
    shipment_outcomes: BTreeMap<ShipmentId, ShipmentOutcome>,
    /// Set while unwinding towards a terminal status.
    pending_abort: Option<(OrderState, String)>,
    compensation_failures: Vec<String>,
}

impl Aggregate for SagaInstance {
    type Event = SagaEvent;

    fn stream_type() -> &'static str {
        SAGA_TYPE
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
            SagaEvent::SagaStarted(data) => {
                self.id = Some(saga_stream_id(&data.order.order_id));
                self.order = Some(data.order);
                self.state = OrderState::Initializing;
                self.message = "order accepted".to_string();
            }
            SagaEvent::StatusChanged(data) => {
                self.state = data.status;
                self.message = data.message;
                if data.status.is_terminal() {
                    self.pending_abort = None;
                }
            }
            SagaEvent::StepCompleted(data) => {
                self.completed_steps.push(data.step_name);
                if let Some(compensation) = data.compensation {
                    self.compensations.push(compensation);
                }
            }
            SagaEvent::StepFailed(data) => {
                self.failure_reason = Some(data.error);
            }
            SagaEvent::AdminActionReceived(data) => {
                self.admin_action = Some(data.action);
            }
            SagaEvent::PaymentReceived(data) => {
                self.payment_reference = Some(data.reference);
            }
            SagaEvent::PaymentTimerStarted(data) => {
                self.payment_deadline = Some(data.deadline);
            }
            SagaEvent::PaymentTimedOut(_) => {
                self.payment_timed_out = true;
            }
            SagaEvent::ShipmentsPlanned(data) => {
                self.shipments = data.shipments;
            }
            SagaEvent::ShipmentCompleted(data) => {
                self.shipment_outcomes.insert(
                    data.shipment_id,
                    ShipmentOutcome::Labeled {
                        tracking_number: data.tracking_number,
                    },
                );
            }
            SagaEvent::ShipmentFailed(data) => {
                self.shipment_outcomes.insert(
                    data.shipment_id,
                    ShipmentOutcome::Failed { error: data.error },
                );
            }
            SagaEvent::CompensationStarted(data) => {
                self.pending_abort = Some((data.target, data.reason));
            }
            SagaEvent::CompensationStepCompleted(_) => {
                self.compensations.pop();
            }
            SagaEvent::CompensationStepFailed(data) => {
                self.compensations.pop();
                self.compensation_failures
                    .push(format!("{}: {}", data.step_name, data.error));
            }
        }
    }
}

// Query methods
impl SagaInstance {
    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.order.as_ref().map(|order| &order.order_id)
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Snapshot for queries. None before the saga started.
    pub fn status(&self) -> Option<OrderStatus> {
        let order_id = self.order_id()?;
        Some(OrderStatus::new(
            order_id.clone(),
            self.state,
            self.message.clone(),
        ))
    }

    pub fn is_step_completed(&self, step_name: &str) -> bool {
        self.completed_steps.iter().any(|step| step == step_name)
    }

    pub fn completed_steps(&self) -> &[String] {
        &self.completed_steps
    }

    pub fn compensations(&self) -> &CompensationStack {
        &self.compensations
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    pub fn admin_action(&self) -> Option<AdminAction> {
        self.admin_action
    }

    pub fn payment_reference(&self) -> Option<&str> {
        self.payment_reference.as_deref()
    }

    pub fn payment_deadline(&self) -> Option<DateTime<Utc>> {
        self.payment_deadline
    }

    pub fn payment_timed_out(&self) -> bool {
        self.payment_timed_out
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    pub fn shipment_outcome(&self, shipment_id: &ShipmentId) -> Option<&ShipmentOutcome> {
        self.shipment_outcomes.get(shipment_id)
    }

    pub fn pending_abort(&self) -> Option<&(OrderState, String)> {
        self.pending_abort.as_ref()
    }

    pub fn compensation_failures(&self) -> &[String] {
        &self.compensation_failures
    }

    /// Whether the signal the current status waits for has already been
    /// decided: received, or overtaken by the payment deadline.
    pub fn wait_resolved(&self) -> bool {
        match self.state {
            OrderState::AwaitingReview => self.admin_action.is_some(),
            OrderState::AwaitingPayment => {
                self.payment_reference.is_some() || self.payment_timed_out
            }
            _ => false,
        }
    }
}
