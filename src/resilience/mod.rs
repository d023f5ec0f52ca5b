//! Resilience primitives: admission control and retries.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Fixed-window limiter with a bounded oldest-first queue |
//! | [`waiter_queue`] | The queue of callers waiting for the next window |
//! | [`retry`] | Bounded retry loop with capped exponential backoff |
//!
//! ## Rate Limiter
//!
//! ```rust
//! use adguard_dispatch::resilience::rate_limiter::{Admission, RateLimiter, RateLimiterConfig};
//! use std::time::Duration;
//!
//! let limiter = RateLimiter::new(
//!     RateLimiterConfig::new(5, Duration::from_secs(60)).with_queue_capacity(10),
//! );
//! match limiter.try_acquire()? {
//!     Admission::Admitted(_) => { /* send now */ }
//!     Admission::MustWait(queued) => { /* queued.wait(&cancel).await */ drop(queued) }
//!     Admission::Rejected => { /* back off */ }
//! }
//! # Ok::<(), adguard_dispatch::Error>(())
//! ```
//!
//! ## Retry Policy
//!
//! ```rust
//! use adguard_dispatch::resilience::retry::{RetryConfig, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(
//!     RetryConfig::new(3).with_backoff(Duration::from_millis(200), Duration::from_secs(10)),
//! );
//! assert_eq!(policy.backoff(1), Duration::from_millis(200));
//! assert_eq!(policy.backoff(2), Duration::from_millis(400));
//! ```

pub mod rate_limiter;
pub mod retry;
pub mod waiter_queue;
