use super::{Next, Stage};
use crate::clock::Clock;
use crate::types::{DispatchContext, DispatchOutcome, DispatchRequest, FailureCause, FailureKind};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Bounds the rest of the chain for one attempt. Elapsing is a transient timeout,
/// so the retry loop may try again.
///
/// Placed after the rate limiter so time spent queued for a permit does not count.
pub struct AttemptTimeout {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl AttemptTimeout {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self { timeout, clock }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl Stage for AttemptTimeout {
    async fn process(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
        next: Next<'_>,
    ) -> DispatchOutcome {
        let expires = self.clock.now() + self.timeout;
        tokio::select! {
            outcome = next.run(request, ctx) => outcome,
            _ = self.clock.sleep_until(expires) => {
                let timeout_ms = self.timeout.as_millis() as u64;
                debug!(correlation_id = ctx.correlation_id(), timeout_ms, "attempt timed out");
                DispatchOutcome::TransientFailure(FailureCause::new(
                    FailureKind::Timeout,
                    format!("attempt exceeded {}ms", timeout_ms),
                ))
            }
        }
    }

    fn name(&self) -> &str {
        "attempt_timeout"
    }
}
