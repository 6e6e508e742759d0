//! External service traits the saga steps call.

pub mod inventory;
pub mod shipping;

pub use self::inventory::InventoryService;
pub use self::shipping::{InMemoryShippingService, ShippingService};
