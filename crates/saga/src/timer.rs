//! Durable timers.
//!
//! Deadlines are wall-clock instants persisted in the journal, so a resumed
//! saga waits only for the time that is left.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait TimerService: Send + Sync {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Completes once `deadline` has passed.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Timer backed by the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTimer;

#[async_trait]
impl TimerService for TokioTimer {
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - self.now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;
    }
}
