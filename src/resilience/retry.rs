//! Bounded retry loop with exponential backoff and an overall deadline.
//!
//! The policy owns no shared state. Each call to [`RetryPolicy::execute`]
//! creates a fresh [`RequestAttempt`] per try and resolves to one
//! [`RetryReport`] describing the terminal outcome and how it was reached.

use crate::clock::{default_clock, Clock};
use crate::types::{DispatchContext, DispatchOutcome, FailureCause};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    #[serde(rename = "backoff_base_ms", with = "crate::config::duration_ms")]
    pub backoff_base: Duration,
    #[serde(rename = "backoff_cap_ms", with = "crate::config::duration_ms")]
    pub backoff_cap: Duration,
    /// Budget for the whole loop, measured from the first attempt.
    #[serde(rename = "overall_deadline_ms", with = "crate::config::opt_duration_ms")]
    pub overall_deadline: Option<Duration>,
    /// Add up to 10% jitter, never past the next backoff step.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(200),
            backoff_cap: Duration::from_secs(10),
            overall_deadline: Some(Duration::from_secs(60)),
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_overall_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.overall_deadline = deadline;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::configuration_with_context(
                "max_attempts must be at least 1",
                ErrorContext::new()
                    .with_field_path("retry.max_attempts")
                    .with_source("retry_policy"),
            ));
        }
        if self.backoff_base > self.backoff_cap {
            return Err(Error::configuration_with_context(
                "backoff base exceeds backoff cap",
                ErrorContext::new()
                    .with_field_path("retry.backoff_base_ms")
                    .with_details(format!(
                        "base={}ms cap={}ms",
                        self.backoff_base.as_millis(),
                        self.backoff_cap.as_millis()
                    ))
                    .with_source("retry_policy"),
            ));
        }
        Ok(())
    }
}

/// One try of a logical request. Created fresh for every attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAttempt {
    /// 1-based attempt number.
    pub number: u32,
    /// Effective deadline of the whole operation, if any.
    pub deadline: Option<Instant>,
    /// `<context correlation id>#<number>`
    pub correlation_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    Pending,
    Attempting(u32),
    Success,
    PermanentFailure,
    /// Every attempt failed transiently.
    Exhausted,
    Cancelled,
    TimedOut,
    /// The rate limiter refused admission; surfaced without retrying.
    Rejected,
}

impl RetryState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RetryState::Pending | RetryState::Attempting(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RetryState::Pending => "pending",
            RetryState::Attempting(_) => "attempting",
            RetryState::Success => "success",
            RetryState::PermanentFailure => "permanent_failure",
            RetryState::Exhausted => "exhausted",
            RetryState::Cancelled => "cancelled",
            RetryState::TimedOut => "timed_out",
            RetryState::Rejected => "rejected",
        }
    }
}

#[derive(Debug)]
pub struct RetryReport<T> {
    pub outcome: DispatchOutcome<T>,
    /// Attempts actually started.
    pub attempts: u32,
    pub state: RetryState,
    /// Backoff delays slept between attempts, in order.
    pub retry_delays: Vec<Duration>,
}

#[derive(Clone)]
pub struct RetryPolicy {
    cfg: RetryConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("cfg", &self.cfg).finish()
    }
}

impl RetryPolicy {
    pub fn new(cfg: RetryConfig) -> Self {
        Self::with_clock(cfg, default_clock())
    }

    pub fn with_clock(cfg: RetryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { cfg, clock }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.cfg
    }

    /// Delay after failed attempt `attempt` (1-based): `min(base * 2^(attempt-1), cap)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.cfg
            .backoff_base
            .saturating_mul(factor)
            .min(self.cfg.backoff_cap)
    }

    /// Backoff for `attempt`, raised to the server's `Retry-After` and clamped to the cap.
    pub fn delay_for(&self, attempt: u32, cause: &FailureCause) -> Duration {
        let mut delay = self.backoff(attempt);
        if self.cfg.jitter {
            let next = self.backoff(attempt.saturating_add(1));
            delay += jitter(delay, next - delay);
        }
        if let Some(retry_after) = cause.retry_after {
            delay = delay.max(retry_after);
        }
        delay.min(self.cfg.backoff_cap)
    }

    fn effective_deadline(&self, ctx: &DispatchContext, start: Instant) -> Option<Instant> {
        let own = self.cfg.overall_deadline.map(|d| start + d);
        match (ctx.deadline(), own) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Run `attempt_fn` until it succeeds, fails permanently, or the attempt
    /// budget, deadline or cancellation stops the loop.
    ///
    /// Only `TransientFailure` is retried. Every other outcome is returned as
    /// soon as it is observed.
    pub async fn execute<T, F, Fut>(&self, ctx: &DispatchContext, mut attempt_fn: F) -> RetryReport<T>
    where
        F: FnMut(RequestAttempt) -> Fut,
        Fut: Future<Output = DispatchOutcome<T>>,
    {
        let clock = &*self.clock;
        let deadline = self.effective_deadline(ctx, clock.now());
        let mut retry_delays = Vec::new();
        let mut number = 0u32;

        let report = |outcome: DispatchOutcome<T>,
                      attempts: u32,
                      state: RetryState,
                      retry_delays: Vec<Duration>| RetryReport {
            outcome,
            attempts,
            state,
            retry_delays,
        };

        loop {
            if ctx.is_cancelled() {
                return report(DispatchOutcome::Cancelled, number, RetryState::Cancelled, retry_delays);
            }
            if deadline.is_some_and(|d| clock.now() >= d) {
                return report(DispatchOutcome::TimedOut, number, RetryState::TimedOut, retry_delays);
            }

            number += 1;
            let attempt = RequestAttempt {
                number,
                deadline,
                correlation_id: format!("{}#{}", ctx.correlation_id(), number),
            };
            debug!(
                correlation_id = attempt.correlation_id.as_str(),
                attempt = number,
                "dispatch attempt started"
            );

            let outcome = tokio::select! {
                biased;
                _ = ctx.cancelled() => DispatchOutcome::Cancelled,
                _ = sleep_until_opt(clock, deadline) => DispatchOutcome::TimedOut,
                outcome = attempt_fn(attempt) => outcome,
            };

            let cause = match outcome {
                DispatchOutcome::TransientFailure(cause) => cause,
                other => {
                    let state = match &other {
                        DispatchOutcome::Success(_) => RetryState::Success,
                        DispatchOutcome::PermanentFailure(_) => RetryState::PermanentFailure,
                        DispatchOutcome::RateLimited => RetryState::Rejected,
                        DispatchOutcome::Cancelled => RetryState::Cancelled,
                        DispatchOutcome::TimedOut | DispatchOutcome::TransientFailure(_) => {
                            RetryState::TimedOut
                        }
                    };
                    if !matches!(state, RetryState::Success) {
                        info!(
                            correlation_id = ctx.correlation_id(),
                            attempt = number,
                            outcome = other.label(),
                            "dispatch finished without success"
                        );
                    }
                    return report(other, number, state, retry_delays);
                }
            };

            if number >= self.cfg.max_attempts {
                warn!(
                    correlation_id = ctx.correlation_id(),
                    attempts = number,
                    status = cause.status,
                    error = %cause,
                    "retries exhausted"
                );
                return report(
                    DispatchOutcome::TransientFailure(cause),
                    number,
                    RetryState::Exhausted,
                    retry_delays,
                );
            }

            let delay = self.delay_for(number, &cause);
            let wake_at = clock.now() + delay;
            if deadline.is_some_and(|d| wake_at >= d) {
                info!(
                    correlation_id = ctx.correlation_id(),
                    attempt = number,
                    delay_ms = delay.as_millis() as u64,
                    "next retry would cross the deadline"
                );
                return report(DispatchOutcome::TimedOut, number, RetryState::TimedOut, retry_delays);
            }

            debug!(
                correlation_id = ctx.correlation_id(),
                attempt = number,
                status = cause.status,
                delay_ms = delay.as_millis() as u64,
                error = %cause,
                "transient failure, backing off"
            );
            retry_delays.push(delay);

            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return report(DispatchOutcome::Cancelled, number, RetryState::Cancelled, retry_delays);
                }
                _ = clock.sleep_until(wake_at) => {}
            }
        }
    }
}

async fn sleep_until_opt(clock: &dyn Clock, deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => clock.sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Up to 10% of `delay`, bounded by `room`.
fn jitter(delay: Duration, room: Duration) -> Duration {
    use rand::Rng;
    let max_ms = (delay / 10).min(room).as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DispatchResponse, FailureKind};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, base_ms: u64, cap_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            RetryConfig::new(max_attempts)
                .with_backoff(Duration::from_millis(base_ms), Duration::from_millis(cap_ms))
                .with_overall_deadline(None),
        )
    }

    fn transient() -> DispatchOutcome {
        DispatchOutcome::TransientFailure(FailureCause::from_response(&DispatchResponse::new(
            503,
            "unavailable",
        )))
    }

    fn ok() -> DispatchOutcome {
        DispatchOutcome::Success(DispatchResponse::new(200, "{}"))
    }

    #[test]
    fn test_backoff_doubles_until_cap() {
        let p = policy(10, 100, 1_000);
        let delays: Vec<u64> = (1..=6).map(|n| p.backoff(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
        assert_eq!(p.backoff(64), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_between_steps() {
        let p = RetryPolicy::new(
            RetryConfig::new(10)
                .with_backoff(Duration::from_millis(100), Duration::from_millis(1_000))
                .with_jitter(true),
        );
        let cause = FailureCause::new(FailureKind::Timeout, "slow");
        for _ in 0..200 {
            let mut prev = Duration::ZERO;
            for n in 1..=8 {
                let d = p.delay_for(n, &cause);
                assert!(d >= p.backoff(n));
                assert!(d >= prev);
                assert!(d <= Duration::from_millis(1_000));
                prev = d;
            }
        }
    }

    #[test]
    fn test_jitter_bounded_by_tenth_and_room() {
        let delay = Duration::from_millis(1_000);
        for _ in 0..500 {
            assert!(jitter(delay, Duration::from_secs(5)) <= Duration::from_millis(100));
            assert!(jitter(delay, Duration::from_millis(30)) <= Duration::from_millis(30));
        }
        assert_eq!(jitter(delay, Duration::ZERO), Duration::ZERO);
        assert_eq!(jitter(Duration::from_millis(5), Duration::from_secs(1)), Duration::ZERO);
    }

    #[test]
    fn test_retry_after_raises_delay_within_cap() {
        let p = policy(3, 100, 2_000);
        let cause = FailureCause::new(FailureKind::Status, "busy").with_retry_after(Duration::from_secs(1));
        assert_eq!(p.delay_for(1, &cause), Duration::from_secs(1));
        let cause = cause.with_retry_after(Duration::from_secs(30));
        assert_eq!(p.delay_for(1, &cause), Duration::from_secs(2));
    }

    #[test]
    fn test_validate_rejects_bad_config() {
        assert!(RetryConfig::new(0).validate().is_err());
        let inverted = RetryConfig::new(3).with_backoff(Duration::from_secs(5), Duration::from_secs(1));
        assert!(matches!(inverted.validate(), Err(Error::Configuration { .. })));
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_every_attempt_exhausts() {
        let p = policy(3, 100, 1_000);
        let calls = AtomicU32::new(0);
        let ctx = DispatchContext::new();
        let report = p
            .execute(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { transient() }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.state, RetryState::Exhausted);
        assert!(report.outcome.is_transient());
        assert_eq!(
            report.retry_delays,
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_stops_immediately() {
        let p = policy(3, 100, 1_000);
        let ctx = DispatchContext::new();
        let report = p
            .execute(&ctx, |_| async {
                DispatchOutcome::<DispatchResponse>::PermanentFailure(FailureCause::from_response(
                    &DispatchResponse::new(404, "missing"),
                ))
            })
            .await;
        assert_eq!(report.attempts, 1);
        assert_eq!(report.state, RetryState::PermanentFailure);
        assert!(report.retry_delays.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_after_transient() {
        let p = policy(3, 100, 1_000);
        let ctx = DispatchContext::new().with_correlation_id("op");
        let seen = std::sync::Mutex::new(Vec::new());
        let start = Instant::now();
        let report = p
            .execute(&ctx, |attempt| {
                seen.lock().unwrap().push(attempt.correlation_id.clone());
                async move {
                    if attempt.number == 1 {
                        transient()
                    } else {
                        ok()
                    }
                }
            })
            .await;
        assert_eq!(report.state, RetryState::Success);
        assert_eq!(report.attempts, 2);
        assert_eq!(Instant::now() - start, Duration::from_millis(100));
        assert_eq!(*seen.lock().unwrap(), vec!["op#1".to_string(), "op#2".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_truncates_retries() {
        let p = RetryPolicy::new(
            RetryConfig::new(5)
                .with_backoff(Duration::from_secs(1), Duration::from_secs(10))
                .with_overall_deadline(Some(Duration::from_millis(2_500))),
        );
        let ctx = DispatchContext::new();
        let calls = AtomicU32::new(0);
        let report = p
            .execute(&ctx, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { transient() }
            })
            .await;
        // t=0 fail, sleep 1s, t=1s fail, next wake at 3s is past the 2.5s deadline.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.state, RetryState::TimedOut);
        assert_eq!(report.outcome.label(), "timed_out");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_times_out_at_deadline() {
        let p = policy(3, 100, 1_000);
        let start = Instant::now();
        let ctx = DispatchContext::new().with_deadline(start + Duration::from_secs(5));
        let report = p
            .execute(&ctx, |_| async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                ok()
            })
            .await;
        assert_eq!(report.state, RetryState::TimedOut);
        assert_eq!(report.attempts, 1);
        assert_eq!(Instant::now() - start, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let p = policy(5, 1_000, 10_000);
        let ctx = DispatchContext::new();
        let report = p
            .execute(&ctx, |_| {
                ctx.cancel();
                async { transient() }
            })
            .await;
        assert_eq!(report.state, RetryState::Cancelled);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_is_not_retried() {
        let p = policy(3, 100, 1_000);
        let ctx = DispatchContext::new();
        let report = p
            .execute(&ctx, |_| async { DispatchOutcome::<DispatchResponse>::RateLimited })
            .await;
        assert_eq!(report.state, RetryState::Rejected);
        assert_eq!(report.attempts, 1);
        assert_eq!(report.outcome, DispatchOutcome::RateLimited);
    }
}
