use crate::resilience::rate_limiter::RateLimiterSnapshot;

/// A snapshot of runtime "signals" (facts only, no policy).
///
/// Callers can use it to decide whether to submit more work now or back off.
#[derive(Debug, Clone, Default)]
pub struct SignalsSnapshot {
    /// `None` if the limiter state could not be read.
    pub rate_limiter: Option<RateLimiterSnapshot>,
    pub stages: Vec<String>,
}

impl SignalsSnapshot {
    /// Milliseconds until the next window opens if no permit is left, else zero.
    pub fn estimated_wait_ms(&self) -> Option<u64> {
        let rl = self.rate_limiter.as_ref()?;
        if rl.used < rl.permits && rl.queued == 0 {
            Some(0)
        } else {
            Some(rl.window_remaining_ms)
        }
    }
}
