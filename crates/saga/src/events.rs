//! Facts recorded in the order fulfillment journal.

use chrono::{DateTime, Utc};
use common::ShipmentId;
use domain::{AdminAction, DomainEvent, Order, Shipment};
use serde::{Deserialize, Serialize};

use crate::compensation::Compensation;
use crate::state::OrderState;

/// Events of one order fulfillment saga.
///
/// Replaying them in order reconstructs the saga exactly; every side effect
/// and every external input is recorded here before the saga acts on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// The order was accepted and the saga started.
    SagaStarted(SagaStartedData),

    /// The externally visible status changed.
    StatusChanged(StatusChangedData),

    /// A forward step committed, possibly registering an undo.
    StepCompleted(StepCompletedData),

    /// A forward step failed for good.
    StepFailed(StepFailedData),

    /// A risk review decision arrived.
    AdminActionReceived(AdminActionData),

    /// A payment confirmation arrived.
    PaymentReceived(PaymentData),

    /// The payment deadline was fixed.
    PaymentTimerStarted(PaymentTimerData),

    /// The payment deadline passed without a payment.
    PaymentTimedOut(PaymentTimerData),

    /// The order was split into packages.
    ShipmentsPlanned(ShipmentsPlannedData),

    /// A shipment child finished with a label.
    ShipmentCompleted(ShipmentCompletedData),

    /// A shipment child failed.
    ShipmentFailed(ShipmentFailedData),

    /// Unwinding started towards a terminal status.
    CompensationStarted(CompensationData),

    /// An undo action ran.
    CompensationStepCompleted(StepData),

    /// An undo action failed; unwinding continues.
    CompensationStepFailed(StepFailedData),
}

impl DomainEvent for SagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::StatusChanged(_) => "StatusChanged",
            SagaEvent::StepCompleted(_) => "StepCompleted",
            SagaEvent::StepFailed(_) => "StepFailed",
            SagaEvent::AdminActionReceived(_) => "AdminActionReceived",
            SagaEvent::PaymentReceived(_) => "PaymentReceived",
            SagaEvent::PaymentTimerStarted(_) => "PaymentTimerStarted",
            SagaEvent::PaymentTimedOut(_) => "PaymentTimedOut",
            SagaEvent::ShipmentsPlanned(_) => "ShipmentsPlanned",
            SagaEvent::ShipmentCompleted(_) => "ShipmentCompleted",
            SagaEvent::ShipmentFailed(_) => "ShipmentFailed",
            SagaEvent::CompensationStarted(_) => "CompensationStarted",
            SagaEvent::CompensationStepCompleted(_) => "CompensationStepCompleted",
            SagaEvent::CompensationStepFailed(_) => "CompensationStepFailed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub order: Order,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChangedData {
    pub status: OrderState,
    pub message: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepData {
    pub step_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCompletedData {
    pub step_name: String,
    /// Undo registered by this step, pushed onto the compensation stack.
    pub compensation: Option<Compensation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailedData {
    pub step_name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminActionData {
    pub action: AdminAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentData {
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTimerData {
    pub deadline: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentsPlannedData {
    pub shipments: Vec<Shipment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentCompletedData {
    pub shipment_id: ShipmentId,
    pub tracking_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentFailedData {
    pub shipment_id: ShipmentId,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompensationData {
    /// Status the saga settles in once unwinding finishes.
    pub target: OrderState,
    pub reason: String,
}

// Convenience constructors
impl SagaEvent {
    pub fn saga_started(order: Order) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            order,
            started_at: Utc::now(),
        })
    }

    pub fn status_changed(status: OrderState, message: impl Into<String>) -> Self {
        SagaEvent::StatusChanged(StatusChangedData {
            status,
            message: message.into(),
            changed_at: Utc::now(),
        })
    }

    pub fn step_completed(step_name: impl Into<String>, compensation: Option<Compensation>) -> Self {
        SagaEvent::StepCompleted(StepCompletedData {
            step_name: step_name.into(),
            compensation,
        })
    }

    pub fn step_failed(step_name: impl Into<String>, error: impl Into<String>) -> Self {
        SagaEvent::StepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }

    pub fn admin_action_received(action: AdminAction) -> Self {
        SagaEvent::AdminActionReceived(AdminActionData { action })
    }

    pub fn payment_received(reference: impl Into<String>) -> Self {
        SagaEvent::PaymentReceived(PaymentData {
            reference: reference.into(),
        })
    }

    pub fn payment_timer_started(deadline: DateTime<Utc>) -> Self {
        SagaEvent::PaymentTimerStarted(PaymentTimerData { deadline })
    }

    pub fn payment_timed_out(deadline: DateTime<Utc>) -> Self {
        SagaEvent::PaymentTimedOut(PaymentTimerData { deadline })
    }

    pub fn shipments_planned(shipments: Vec<Shipment>) -> Self {
        SagaEvent::ShipmentsPlanned(ShipmentsPlannedData { shipments })
    }

    pub fn shipment_completed(shipment_id: ShipmentId, tracking_number: impl Into<String>) -> Self {
        SagaEvent::ShipmentCompleted(ShipmentCompletedData {
            shipment_id,
            tracking_number: tracking_number.into(),
        })
    }

    pub fn shipment_failed(shipment_id: ShipmentId, error: impl Into<String>) -> Self {
        SagaEvent::ShipmentFailed(ShipmentFailedData {
            shipment_id,
            error: error.into(),
        })
    }

    pub fn compensation_started(target: OrderState, reason: impl Into<String>) -> Self {
        SagaEvent::CompensationStarted(CompensationData {
            target,
            reason: reason.into(),
        })
    }

    pub fn compensation_step_completed(step_name: impl Into<String>) -> Self {
        SagaEvent::CompensationStepCompleted(StepData {
            step_name: step_name.into(),
        })
    }

    pub fn compensation_step_failed(
        step_name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        SagaEvent::CompensationStepFailed(StepFailedData {
            step_name: step_name.into(),
            error: error.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use common::{OrderId, ProductId};

    use super::*;

    fn order() -> Order {
        Order::new("ORD-1", 500, [ProductId::new("iPhone15")], "cust-1")
    }

    #[test]
    fn test_event_type() {
        assert_eq!(SagaEvent::saga_started(order()).event_type(), "SagaStarted");
        assert_eq!(
            SagaEvent::status_changed(OrderState::Reserving, "").event_type(),
            "StatusChanged"
        );
        assert_eq!(
            SagaEvent::payment_timed_out(Utc::now()).event_type(),
            "PaymentTimedOut"
        );
        assert_eq!(
            SagaEvent::compensation_step_failed("release_inventory", "db down").event_type(),
            "CompensationStepFailed"
        );
    }

    #[test]
    fn step_completed_carries_its_undo() {
        let undo = Compensation::ReleaseInventory {
            order_id: OrderId::new("ORD-1"),
            items: vec![ProductId::new("iPhone15")],
        };
        let event = SagaEvent::step_completed("reserve_inventory", Some(undo.clone()));

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "StepCompleted");
        assert_eq!(json["data"]["compensation"]["kind"], "release_inventory");

        let decoded: SagaEvent = serde_json::from_value(json).unwrap();
        match decoded {
            SagaEvent::StepCompleted(data) => assert_eq!(data.compensation, Some(undo)),
            other => panic!("Expected StepCompleted event, got {other:?}"),
        }
    }

    #[test]
    fn status_is_stored_in_screaming_case() {
        let json =
            serde_json::to_value(SagaEvent::status_changed(OrderState::AwaitingReview, "hold"))
                .unwrap();
        assert_eq!(json["data"]["status"], "AWAITING_REVIEW");
    }
}
