//! At-most-once execution of keyed actions.

use futures_util::future::BoxFuture;

use crate::{
    db::{Database, Transaction},
    error::StoreError,
};

/// How a guarded action was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// The action ran and committed together with its key.
    Applied,
    /// The key was already committed; the action did not run.
    Duplicate,
    /// The action's precondition did not hold; it did not run and its key
    /// was not claimed.
    Skipped,
}

/// Runs an action and records its key in one transaction.
///
/// The key insert and the action's writes commit or roll back together, so a
/// committed key proves the action's effects are durable. A failed action
/// leaves no key behind and can be retried with the same key.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard<D> {
    db: D,
}

impl<D: Database> IdempotencyGuard<D> {
    pub fn new(db: D) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    #[tracing::instrument(skip(self, operation))]
    pub async fn execute<E, F>(&self, key: &str, operation: F) -> Result<Execution, E>
    where
        E: From<StoreError>,
        F: for<'t> FnOnce(&'t mut dyn Transaction) -> BoxFuture<'t, Result<(), E>> + Send,
    {
        let mut tx = self.db.begin().await?;

        match tx.insert_idempotency_key(key).await {
            Ok(()) => {}
            Err(StoreError::UniqueViolation(_)) => {
                tx.rollback().await?;
                tracing::info!(key, "duplicate action suppressed");
                metrics::counter!("idempotent_actions_total", "outcome" => "duplicate")
                    .increment(1);
                return Ok(Execution::Duplicate);
            }
            Err(e) => return Err(e.into()),
        }

        match operation(tx.as_mut()).await {
            Ok(()) => {
                tx.commit().await?;
                metrics::counter!("idempotent_actions_total", "outcome" => "applied").increment(1);
                Ok(Execution::Applied)
            }
            Err(e) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(key, error = %rollback_error, "rollback after failed action failed");
                }
                Err(e)
            }
        }
    }
}
