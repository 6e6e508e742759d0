//! Durable order fulfillment saga.
//!
//! Each order runs as a journaled state machine:
//! 1. Reserve inventory (undo: release it)
//! 2. Wait for a risk review when the amount is above the threshold
//! 3. Wait for payment, bounded by a durable timer
//! 4. Ship two packages through concurrent child processes
//!
//! Rejection and payment timeout unwind the compensation stack, most recent
//! step first. Every step and signal is recorded in the event store, so a
//! restarted process resumes each saga where it stopped.

pub mod aggregate;
pub mod compensation;
pub mod coordinator;
pub mod error;
pub mod events;
mod journal;
pub mod order_fulfillment;
pub mod retry;
pub mod services;
pub mod shipment;
pub mod signals;
pub mod snapshot;
pub mod state;
pub mod timer;
pub mod workflow;

pub use aggregate::{SagaInstance, ShipmentOutcome};
pub use compensation::{Compensation, CompensationStack};
pub use coordinator::{OrderHandle, SagaCoordinator};
pub use error::{Result, SagaError};
pub use events::SagaEvent;
pub use order_fulfillment::{PAYMENT_TIMEOUT, SagaConfig, child_stream_id, saga_stream_id};
pub use retry::{RetryPolicy, retry_step};
pub use services::{InMemoryShippingService, InventoryService, ShippingService};
pub use shipment::{ShipmentChild, ShipmentEvent, ShipmentSplitter, plan_shipments};
pub use signals::{Delivery, Signal, SignalBus, WaitPoint};
pub use state::{OrderState, OrderStatus};
pub use timer::{TimerService, TokioTimer};
pub use workflow::OrderSaga;
