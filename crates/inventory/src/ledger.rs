//! Flash-sale admission gate.

use std::sync::Arc;

use common::ProductId;
use dashmap::DashMap;

/// Outcome of [`AtomicStockLedger::try_reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    RejectedNoStock,
    /// The product was never preheated, so it is not under flash-sale control.
    RejectedNotOpen,
}

impl Admission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Admission::Admitted => "admitted",
            Admission::RejectedNoStock => "rejected_no_stock",
            Admission::RejectedNotOpen => "rejected_not_open",
        }
    }
}

/// In-memory stock counters for flash-sale products.
///
/// Every read-compare-write happens while holding the map shard that owns the
/// product, so concurrent callers can never admit more units than were
/// preheated. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct AtomicStockLedger {
    counters: Arc<DashMap<ProductId, i64>>,
}

impl AtomicStockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the counter for a product. Only safe before traffic starts.
    pub fn preheat(&self, product_id: impl Into<ProductId>, stock: i64) {
        let product_id = product_id.into();
        tracing::info!(%product_id, stock, "flash sale stock preheated");
        self.counters.insert(product_id, stock);
    }

    pub fn try_reserve(&self, product_id: &ProductId, amount: u32) -> Admission {
        let admission = match self.counters.get_mut(product_id) {
            None => Admission::RejectedNotOpen,
            Some(mut remaining) => {
                let amount = i64::from(amount);
                if *remaining < amount {
                    Admission::RejectedNoStock
                } else {
                    *remaining -= amount;
                    Admission::Admitted
                }
            }
        };

        metrics::counter!("flash_sale_admissions_total", "outcome" => admission.as_str())
            .increment(1);
        admission
    }

    /// Gives units back after a downstream failure. Unknown products are ignored.
    pub fn rollback(&self, product_id: &ProductId, amount: u32) {
        match self.counters.get_mut(product_id) {
            Some(mut remaining) => *remaining += i64::from(amount),
            None => {
                tracing::warn!(%product_id, amount, "rollback for product without flash sale stock");
            }
        }
    }

    pub fn remaining(&self, product_id: &ProductId) -> Option<i64> {
        self.counters.get(product_id).map(|remaining| *remaining)
    }

    pub fn is_open(&self, product_id: &ProductId) -> bool {
        self.counters.contains_key(product_id)
    }
}
