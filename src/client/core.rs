use crate::client::builder::DispatcherBuilder;
use crate::client::signals::SignalsSnapshot;
use crate::client::types::CallStats;
use crate::clock::Clock;
use crate::config::DispatchPolicy;
use crate::pipeline::Pipeline;
use crate::resilience::rate_limiter::RateLimiter;
use crate::resilience::retry::RetryPolicy;
use crate::types::{
    DispatchContext, DispatchOutcome, DispatchRequest, FailureCause, FailureKind,
};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, info};

/// Rate-limited, retrying request dispatcher.
///
/// The chain is assembled once by [`DispatcherBuilder`] and reused for every
/// call: retry loop, then the rate-limit stage, then any extra stages, then
/// the transport. The dispatcher itself holds no per-call state, so a single
/// instance can serve any number of concurrent callers.
pub struct Dispatcher {
    pub(crate) pipeline: Arc<Pipeline>,
    pub(crate) limiter: RateLimiter,
    pub(crate) retry: RetryPolicy,
    pub(crate) policy: DispatchPolicy,
    pub(crate) clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// The limiter in front of the transport. Clone it to share the window.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// A fresh context for one logical operation, bounded by the policy's overall deadline.
    pub fn context(&self) -> DispatchContext {
        let ctx = DispatchContext::new();
        match self.policy.retry.overall_deadline {
            Some(budget) => ctx.with_deadline(self.clock.now() + budget),
            None => ctx,
        }
    }

    /// Snapshot current runtime signals (facts only).
    pub fn signals(&self) -> SignalsSnapshot {
        SignalsSnapshot {
            rate_limiter: self.limiter.snapshot().ok(),
            stages: self
                .pipeline
                .stage_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }

    /// Dispatch a request, cloning it for every attempt.
    ///
    /// Only wrap idempotent requests: a transient failure re-sends the whole request.
    pub async fn dispatch(&self, request: DispatchRequest, ctx: &DispatchContext) -> DispatchOutcome {
        self.dispatch_with(|| request.clone(), ctx).await
    }

    /// Dispatch with a factory that builds a fresh, equivalent request per attempt.
    pub async fn dispatch_with<F>(&self, factory: F, ctx: &DispatchContext) -> DispatchOutcome
    where
        F: FnMut() -> DispatchRequest,
    {
        self.dispatch_with_stats(factory, ctx).await.0
    }

    pub async fn dispatch_with_stats<F>(
        &self,
        mut factory: F,
        ctx: &DispatchContext,
    ) -> (DispatchOutcome, CallStats)
    where
        F: FnMut() -> DispatchRequest,
    {
        let started = self.clock.now();
        let pipeline = &self.pipeline;

        let report = self
            .retry
            .execute(ctx, |attempt| {
                let request = factory();
                let attempt_ctx = ctx.child().with_correlation_id(attempt.correlation_id);
                async move { pipeline.send(request, &attempt_ctx).await }
            })
            .await;

        let http_status = match &report.outcome {
            DispatchOutcome::Success(resp) => Some(resp.status),
            other => other.cause().and_then(|c| c.status),
        };
        let stats = CallStats {
            correlation_id: ctx.correlation_id().to_string(),
            attempts: report.attempts,
            state: report.state,
            http_status,
            duration_ms: self
                .clock
                .now()
                .saturating_duration_since(started)
                .as_millis() as u64,
            retry_delays_ms: report
                .retry_delays
                .iter()
                .map(|d| d.as_millis() as u64)
                .collect(),
            queued_ms: ctx.queued().as_millis() as u64,
        };

        debug!(
            correlation_id = stats.correlation_id.as_str(),
            attempts = stats.attempts,
            state = stats.state.as_str(),
            status = stats.http_status,
            duration_ms = stats.duration_ms,
            queued_ms = stats.queued_ms,
            "dispatch finished"
        );

        (report.outcome, stats)
    }

    /// Dispatch and decode a successful body as JSON.
    ///
    /// A body that does not decode is a permanent `Malformed` failure and is not retried.
    pub async fn dispatch_json<T: DeserializeOwned>(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
    ) -> DispatchOutcome<T> {
        self.dispatch(request, ctx)
            .await
            .and_then(|resp| match resp.json::<T>() {
                Ok(value) => DispatchOutcome::Success(value),
                Err(e) => DispatchOutcome::PermanentFailure(FailureCause {
                    kind: FailureKind::Malformed,
                    message: e.to_string(),
                    status: Some(resp.status),
                    retry_after: None,
                }),
            })
    }

    /// Dispatch many requests with bounded concurrency.
    ///
    /// - Results preserve input order.
    /// - Each item runs its own retry loop; all items share the limiter.
    /// - Cancelling `ctx` cancels every item still in flight or queued.
    pub async fn dispatch_batch(
        &self,
        requests: Vec<DispatchRequest>,
        concurrency: usize,
        ctx: &DispatchContext,
    ) -> Vec<DispatchOutcome> {
        let n = requests.len();
        if n == 0 {
            return Vec::new();
        }

        let limit = concurrency.max(1);
        let mut out: Vec<Option<DispatchOutcome>> = (0..n).map(|_| None).collect();

        let results: Vec<(usize, DispatchOutcome)> = futures::stream::iter(requests.into_iter().enumerate())
            .map(|(idx, req)| async move {
                let item_ctx = ctx
                    .child()
                    .with_correlation_id(format!("{}/{}", ctx.correlation_id(), idx));
                (idx, self.dispatch(req, &item_ctx).await)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        for (idx, outcome) in results {
            out[idx] = Some(outcome);
        }

        let outcomes: Vec<DispatchOutcome> = out
            .into_iter()
            .map(|o| {
                o.unwrap_or_else(|| {
                    DispatchOutcome::PermanentFailure(FailureCause::new(
                        FailureKind::Internal,
                        "batch result missing",
                    ))
                })
            })
            .collect();

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        if succeeded < n {
            info!(
                correlation_id = ctx.correlation_id(),
                total = n,
                succeeded,
                "batch finished with failures"
            );
        }
        outcomes
    }
}
