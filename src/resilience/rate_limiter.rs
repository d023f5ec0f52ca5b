use super::waiter_queue::{WaiterId, WaiterQueue};
use crate::clock::{default_clock, Clock};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Maximum admissions per window. Zero rejects everything.
    pub permits: u32,
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    pub window: Duration,
    /// Maximum number of callers allowed to wait for the next window.
    pub queue_capacity: usize,
}

impl RateLimiterConfig {
    pub fn new(permits: u32, window: Duration) -> Self {
        Self {
            permits,
            window,
            queue_capacity: 0,
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(Error::configuration_with_context(
                "rate limit window must be non-zero",
                ErrorContext::new()
                    .with_field_path("rate_limit.window_ms")
                    .with_source("rate_limiter"),
            ));
        }
        Ok(())
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            permits: 10,
            window: Duration::from_secs(1),
            queue_capacity: 100,
        }
    }
}

/// Lease granted by the limiter. Consumed on admission; there is no early release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    pub admitted_at: Instant,
    /// Time spent queued before admission (zero for immediate admission).
    pub waited: Duration,
}

pub enum Admission {
    Admitted(Permit),
    /// Queued for a later window; await [`QueuedPermit::wait`].
    MustWait(QueuedPermit),
    Rejected,
}

impl fmt::Debug for Admission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Admission::Admitted(p) => f.debug_tuple("Admitted").field(p).finish(),
            Admission::MustWait(q) => f.debug_tuple("MustWait").field(&q.until).finish(),
            Admission::Rejected => f.write_str("Rejected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("permit wait cancelled")]
    Cancelled,
    #[error("admission rejected by rate limiter")]
    Rejected,
    #[error("rate limiter unavailable: {0}")]
    Internal(String),
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub permits: u32,
    pub window_ms: u64,
    pub queue_capacity: usize,
    /// Permits consumed in the current window.
    pub used: u32,
    pub queued: usize,
    pub window_remaining_ms: u64,
    /// How long the oldest queued caller has been waiting (ms), if any.
    pub oldest_wait_ms: Option<u64>,
    pub admitted_total: u64,
    pub rejected_total: u64,
    pub cancelled_total: u64,
}

#[derive(Debug)]
struct State {
    /// `None` until the first admission decision opens a window.
    window_start: Option<Instant>,
    used: u32,
    queue: WaiterQueue,
    admitted_total: u64,
    rejected_total: u64,
    cancelled_total: u64,
}

struct Inner {
    cfg: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

/// Fixed-window rate limiter with a bounded oldest-first waiter queue.
///
/// - Window resets lazily, atomically with the admission decision (one lock)
/// - Queued callers are drained oldest-first when the window resets, one permit each
/// - Cloning shares the same window; construct one per upstream and pass it around
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("cfg", &self.inner.cfg)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    pub fn new(cfg: RateLimiterConfig) -> Self {
        Self::with_clock(cfg, default_clock())
    }

    pub fn with_clock(cfg: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let state = Mutex::new(State {
            window_start: None,
            used: 0,
            queue: WaiterQueue::new(cfg.queue_capacity),
            admitted_total: 0,
            rejected_total: 0,
            cancelled_total: 0,
        });
        Self {
            inner: Arc::new(Inner { cfg, clock, state }),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.inner.cfg
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    /// True if both handles share one window.
    pub fn same_as(&self, other: &RateLimiter) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.inner.state.lock().map_err(|_| {
            Error::runtime_with_context(
                "rate limiter state poisoned",
                ErrorContext::new().with_source("rate_limiter"),
            )
        })
    }

    fn window_end(cfg: &RateLimiterConfig, st: &State) -> Option<Instant> {
        st.window_start.map(|start| start + cfg.window)
    }

    /// Open a window at `now` if none is running (first use, or the last one
    /// expired), then hand the fresh permits to queued callers, oldest first.
    /// Returns the end of the current window.
    fn normalize_locked(cfg: &RateLimiterConfig, st: &mut State, now: Instant) -> Instant {
        if let Some(end) = Self::window_end(cfg, st) {
            if now < end {
                return end;
            }
        }
        st.window_start = Some(now);
        st.used = 0;

        let mut drained = 0usize;
        while st.used < cfg.permits {
            let Some(waiter) = st.queue.pop_oldest() else {
                break;
            };
            if waiter.admit(now) {
                st.used += 1;
                st.admitted_total += 1;
                drained += 1;
            }
        }
        if drained > 0 {
            debug!(
                drained,
                still_queued = st.queue.len(),
                "rate limit window reset drained queued callers"
            );
        }
        now + cfg.window
    }

    pub fn try_acquire(&self) -> Result<Admission> {
        self.try_acquire_at(self.inner.clock.now())
    }

    /// Decide admission at `now`: admit, queue for a later window, or reject.
    ///
    /// Never blocks. The returned [`QueuedPermit`] is where a caller suspends.
    pub fn try_acquire_at(&self, now: Instant) -> Result<Admission> {
        let cfg = &self.inner.cfg;
        let mut st = self.lock()?;

        if cfg.permits == 0 {
            st.rejected_total += 1;
            return Ok(Admission::Rejected);
        }

        let until = Self::normalize_locked(cfg, &mut st, now);

        if st.used < cfg.permits && st.queue.is_empty() {
            st.used += 1;
            st.admitted_total += 1;
            return Ok(Admission::Admitted(Permit {
                admitted_at: now,
                waited: Duration::ZERO,
            }));
        }

        match st.queue.push(now) {
            Some((id, rx)) => {
                debug!(
                    queued = st.queue.len(),
                    wait_ms = until.saturating_duration_since(now).as_millis() as u64,
                    "rate limit reached, caller queued"
                );
                Ok(Admission::MustWait(QueuedPermit {
                    id,
                    until,
                    rx,
                    limiter: self.clone(),
                    resolved: false,
                }))
            }
            None => {
                st.rejected_total += 1;
                debug!(queued = st.queue.len(), "rate limit queue full");
                Ok(Admission::Rejected)
            }
        }
    }

    /// Admit now or wait for a later window. A full queue is `WaitError::Rejected`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> std::result::Result<Permit, WaitError> {
        match self
            .try_acquire()
            .map_err(|e| WaitError::Internal(e.to_string()))?
        {
            Admission::Admitted(permit) => Ok(permit),
            Admission::MustWait(queued) => queued.wait(cancel).await,
            Admission::Rejected => Err(WaitError::Rejected),
        }
    }

    /// Normalize at `now` and return the end of the (possibly new) window.
    fn poll_at(&self, now: Instant) -> Result<Instant> {
        let cfg = &self.inner.cfg;
        let mut st = self.lock()?;
        Ok(Self::normalize_locked(cfg, &mut st, now))
    }

    /// Remove a waiter that gave up. No permit is consumed.
    fn abandon(&self, id: WaiterId) -> bool {
        match self.inner.state.lock() {
            Ok(mut st) => {
                let removed = st.queue.remove(id);
                if removed {
                    st.cancelled_total += 1;
                }
                removed
            }
            Err(_) => false,
        }
    }

    pub fn snapshot(&self) -> Result<RateLimiterSnapshot> {
        let cfg = &self.inner.cfg;
        let now = self.inner.clock.now();
        let mut st = self.lock()?;
        // Observing must not open the first window.
        if cfg.permits > 0 && st.window_start.is_some() {
            Self::normalize_locked(cfg, &mut st, now);
        }
        Ok(RateLimiterSnapshot {
            permits: cfg.permits,
            window_ms: cfg.window.as_millis() as u64,
            queue_capacity: st.queue.capacity(),
            used: st.used,
            queued: st.queue.len(),
            window_remaining_ms: Self::window_end(cfg, &st)
                .map_or(0, |end| end.saturating_duration_since(now).as_millis() as u64),
            oldest_wait_ms: st
                .queue
                .oldest_enqueued_at()
                .map(|t| now.saturating_duration_since(t).as_millis() as u64),
            admitted_total: st.admitted_total,
            rejected_total: st.rejected_total,
            cancelled_total: st.cancelled_total,
        })
    }
}

/// A caller's place in the limiter queue.
///
/// Dropping it before it resolves removes the caller from the queue without
/// consuming a permit, so a deadline that aborts the wait cleans up after itself.
pub struct QueuedPermit {
    id: WaiterId,
    until: Instant,
    rx: oneshot::Receiver<Permit>,
    limiter: RateLimiter,
    resolved: bool,
}

impl QueuedPermit {
    /// When the current window ends and this caller can next be considered.
    pub fn until(&self) -> Instant {
        self.until
    }

    pub fn id(&self) -> WaiterId {
        self.id
    }

    /// Still in the limiter queue: not yet admitted, cancelled or dropped.
    pub fn is_queued(&self) -> bool {
        self.limiter
            .inner
            .state
            .lock()
            .map(|st| st.queue.contains(self.id))
            .unwrap_or(false)
    }

    /// Suspend until admitted, cancelled or rejected. Holds no lock while waiting.
    pub async fn wait(mut self, cancel: &CancellationToken) -> std::result::Result<Permit, WaitError> {
        let clock = self.limiter.inner.clock.clone();
        loop {
            let until = self.until;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.resolved = true;
                    self.limiter.abandon(self.id);
                    return Err(WaitError::Cancelled);
                }
                res = &mut self.rx => {
                    self.resolved = true;
                    // Sender dropped without a permit: the queue let go of us.
                    return res.map_err(|_| WaitError::Rejected);
                }
                _ = clock.sleep_until(until) => {
                    match self.limiter.poll_at(clock.now()) {
                        Ok(next) => self.until = next,
                        Err(e) => {
                            self.resolved = true;
                            self.limiter.abandon(self.id);
                            return Err(WaitError::Internal(e.to_string()));
                        }
                    }
                }
            }
        }
    }
}

impl Drop for QueuedPermit {
    fn drop(&mut self) {
        if !self.resolved {
            self.limiter.abandon(self.id);
        }
    }
}
