use super::{Next, Stage};
use crate::resilience::rate_limiter::{Admission, RateLimiter, WaitError};
use crate::types::{DispatchContext, DispatchOutcome, DispatchRequest, FailureCause, FailureKind};
use async_trait::async_trait;
use tracing::{debug, warn};

/// Admission-control stage: nothing reaches the next stage without a permit.
///
/// A rejected request returns `RateLimited` without touching the transport.
/// A queued request suspends until admitted, cancelled or rejected.
#[derive(Debug, Clone)]
pub struct RateLimitedDispatcher {
    limiter: RateLimiter,
}

impl RateLimitedDispatcher {
    pub fn new(limiter: RateLimiter) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

fn internal(message: String) -> DispatchOutcome {
    DispatchOutcome::PermanentFailure(FailureCause::new(FailureKind::Internal, message))
}

#[async_trait]
impl Stage for RateLimitedDispatcher {
    async fn process(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
        next: Next<'_>,
    ) -> DispatchOutcome {
        let admission = match self.limiter.try_acquire() {
            Ok(admission) => admission,
            Err(e) => return internal(e.to_string()),
        };

        match admission {
            Admission::Admitted(_) => {
                debug!(correlation_id = ctx.correlation_id(), "permit granted");
                next.run(request, ctx).await
            }
            Admission::MustWait(queued) => {
                let wait_ms = queued
                    .until()
                    .saturating_duration_since(self.limiter.clock().now())
                    .as_millis() as u64;
                debug!(
                    correlation_id = ctx.correlation_id(),
                    wait_ms,
                    "waiting for rate limit window"
                );
                match queued.wait(ctx.cancellation_token()).await {
                    Ok(permit) => {
                        ctx.record_queued(permit.waited);
                        debug!(
                            correlation_id = ctx.correlation_id(),
                            waited_ms = permit.waited.as_millis() as u64,
                            "permit granted after queueing"
                        );
                        next.run(request, ctx).await
                    }
                    Err(WaitError::Cancelled) => DispatchOutcome::Cancelled,
                    Err(WaitError::Rejected) => DispatchOutcome::RateLimited,
                    Err(WaitError::Internal(message)) => internal(message),
                }
            }
            Admission::Rejected => {
                warn!(
                    correlation_id = ctx.correlation_id(),
                    queue_capacity = self.limiter.config().queue_capacity,
                    "rate limit queue full, request rejected"
                );
                DispatchOutcome::RateLimited
            }
        }
    }

    fn name(&self) -> &str {
        "rate_limiter"
    }
}
