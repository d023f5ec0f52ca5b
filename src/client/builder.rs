use crate::client::core::Dispatcher;
use crate::clock::{default_clock, Clock};
use crate::config::DispatchPolicy;
use crate::pipeline::{AttemptTimeout, Pipeline, RateLimitedDispatcher, Stage};
use crate::resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::resilience::retry::{RetryConfig, RetryPolicy};
use crate::transport::{HttpTransport, Transport};
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Builder for [`Dispatcher`].
///
/// Keep one limiter per upstream: either let each built dispatcher own its
/// limiter, or build one [`RateLimiter`] and pass it to every builder with
/// [`shared_limiter`](Self::shared_limiter).
pub struct DispatcherBuilder {
    policy: DispatchPolicy,
    clock: Option<Arc<dyn Clock>>,
    limiter: Option<RateLimiter>,
    stages: Vec<Arc<dyn Stage>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            policy: DispatchPolicy::default(),
            clock: None,
            limiter: None,
            stages: Vec::new(),
        }
    }

    pub fn policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn rate_limit(mut self, cfg: RateLimiterConfig) -> Self {
        self.policy.rate_limit = cfg;
        self
    }

    pub fn retry(mut self, cfg: RetryConfig) -> Self {
        self.policy.retry = cfg;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.policy.attempt_timeout = Some(timeout);
        self
    }

    /// Apply `ADGUARD_*` environment overrides to the current policy.
    ///
    /// - `ADGUARD_RATE_LIMIT_PERMITS`, `ADGUARD_RATE_LIMIT_WINDOW_MS`, `ADGUARD_RATE_LIMIT_QUEUE`
    /// - `ADGUARD_RETRY_MAX_ATTEMPTS`, `ADGUARD_RETRY_BASE_MS`, `ADGUARD_RETRY_CAP_MS`
    /// - `ADGUARD_RETRY_DEADLINE_MS`, `ADGUARD_ATTEMPT_TIMEOUT_MS`
    pub fn from_env(mut self) -> Result<Self> {
        self.policy = self.policy.apply_env()?;
        Ok(self)
    }

    /// Inject the time source. Defaults to the tokio clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an existing limiter instead of creating one from the policy.
    ///
    /// Its configuration replaces `policy.rate_limit`.
    pub fn shared_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    /// Add a stage after the rate limiter, before the transport.
    pub fn stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self, transport: Arc<dyn Transport>) -> Result<Dispatcher> {
        let mut policy = self.policy;
        let clock = self.clock.unwrap_or_else(default_clock);

        let limiter = match self.limiter {
            Some(limiter) => {
                policy.rate_limit = limiter.config().clone();
                limiter
            }
            None => RateLimiter::with_clock(policy.rate_limit.clone(), clock.clone()),
        };
        policy.validate()?;

        let mut pipeline =
            Pipeline::new(transport).with_stage(Arc::new(RateLimitedDispatcher::new(limiter.clone())));
        for stage in self.stages {
            pipeline = pipeline.with_stage(stage);
        }
        if let Some(timeout) = policy.attempt_timeout {
            pipeline = pipeline.with_stage(Arc::new(AttemptTimeout::new(timeout, clock.clone())));
        }

        info!(
            permits = policy.rate_limit.permits,
            window_ms = policy.rate_limit.window.as_millis() as u64,
            queue_capacity = policy.rate_limit.queue_capacity,
            max_attempts = policy.retry.max_attempts,
            stages = pipeline.len(),
            "dispatcher built"
        );

        Ok(Dispatcher {
            pipeline: Arc::new(pipeline),
            retry: RetryPolicy::with_clock(policy.retry.clone(), clock.clone()),
            limiter,
            policy,
            clock,
        })
    }

    /// Build against the AdGuard DNS API, reading connection settings from the environment.
    pub fn build_http(self) -> Result<Dispatcher> {
        let transport = HttpTransport::from_env()?;
        self.build(Arc::new(transport))
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
