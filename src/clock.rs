//! Time source for window and backoff logic.
//!
//! Everything time-based in the dispatcher reads `now()` and sleeps through a
//! [`Clock`] instead of touching ambient system time. [`TokioClock`] is backed
//! by `tokio::time`, so tests running on a paused runtime
//! (`#[tokio::test(start_paused = true)]`) observe window resets and backoff
//! delays deterministically.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Suspend until `deadline`. Returns immediately if it already passed.
    async fn sleep_until(&self, deadline: Instant);
}

/// Clock driven by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

pub fn default_clock() -> Arc<dyn Clock> {
    Arc::new(TokioClock)
}
