//! Retry policy applied to individual saga steps.

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Exponential backoff between attempts of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub backoff_coefficient: f64,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            max_interval: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// A policy that retries without waiting.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_interval: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_interval)
            .min(self.max_interval)
    }
}

/// Runs `op` until it succeeds, fails permanently, or runs out of attempts.
///
/// Only errors reporting [`SagaError::is_transient`](crate::SagaError::is_transient)
/// are retried. The last error is returned unchanged.
pub async fn retry_step<T, F, Fut>(step: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    step,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "saga step attempt failed, retrying"
                );
                metrics::counter!("saga_step_retries_total", "step" => step.to_string())
                    .increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use common::ProductId;
    use inventory::InventoryError;

    use super::*;
    use crate::SagaError;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(200), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = retry_step("generate_shipping_label", &RetryPolicy::default(), move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(SagaError::ShippingService("busy".into()))
            } else {
                Ok("SF-1")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "SF-1");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry_step("generate_shipping_label", &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(SagaError::ShippingService("down".into()))
        })
        .await;

        assert!(matches!(result, Err(SagaError::ShippingService(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = retry_step("reserve_inventory", &RetryPolicy::default(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(InventoryError::OutOfStock(ProductId::new("MacPro")).into())
        })
        .await;

        assert!(matches!(
            result,
            Err(SagaError::Inventory(InventoryError::OutOfStock(_)))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
