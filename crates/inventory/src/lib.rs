//! Inventory side of order fulfillment.
//!
//! - [`Database`]/[`Transaction`]: catalog storage with in-memory and PostgreSQL backends
//! - [`IdempotencyGuard`]: at-most-once execution of keyed actions
//! - [`InventoryReservationStore`]: all-or-nothing stock reservation and release
//! - [`AtomicStockLedger`]: race-free flash-sale admission counters

pub mod db;
pub mod error;
pub mod idempotency;
pub mod ledger;
pub mod memory;
pub mod postgres;
pub mod product;
pub mod reservation;

pub use db::{Database, Transaction};
pub use error::{InventoryError, Result, StoreError};
pub use idempotency::{Execution, IdempotencyGuard};
pub use ledger::{Admission, AtomicStockLedger};
pub use memory::InMemoryDatabase;
pub use postgres::PostgresDatabase;
pub use product::{IdempotencyRecord, Product, demo_catalog};
pub use reservation::{InventoryReservationStore, release_key, reserve_key};
