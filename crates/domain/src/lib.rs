//! Domain model of order fulfillment.
//!
//! - [`Order`] and its validation rules
//! - [`Shipment`] packages produced when an order ships
//! - [`AdminAction`] decisions of the risk review
//! - the [`Aggregate`]/[`DomainEvent`] traits durable processes replay from the journal

pub mod action;
pub mod aggregate;
pub mod error;
pub mod order;
pub mod shipment;

pub use action::AdminAction;
pub use aggregate::{Aggregate, DomainEvent, replay};
pub use common::{CustomerId, OrderId, ProductId, ShipmentId, StreamId};
pub use error::{InvalidAdminAction, ValidationError};
pub use order::{Order, REVIEW_THRESHOLD};
pub use shipment::Shipment;
