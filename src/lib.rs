//! # adguard-dispatch
//!
//! Client-side admission control for the AdGuard DNS API: a reusable request
//! dispatcher that keeps automation tools from overwhelming a rate-limited
//! upstream.
//!
//! ## Overview
//!
//! Every outbound call passes through one chain, assembled once per process
//! (or per logical client) and shared by all callers:
//!
//! ```text
//! RetryPolicy ─► RateLimitedDispatcher ─► [stages] ─► Transport
//! ```
//!
//! - **Fixed-window rate limiting**: at most `permits` admissions per window,
//!   with a bounded oldest-first queue for callers that arrive when the window
//!   is spent. A full queue rejects immediately.
//! - **Retries**: transient failures (timeouts, connection errors, 429, 5xx)
//!   are retried with capped exponential backoff under an overall deadline.
//!   Each retry re-acquires a permit.
//! - **Cancellation**: one [`DispatchContext`] per operation; cancelling it
//!   aborts a queued permit wait, a backoff sleep or the transport call.
//! - **Deterministic time**: all window and backoff logic goes through the
//!   [`clock::Clock`] trait.
//!
//! Every call resolves to exactly one [`DispatchOutcome`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use adguard_dispatch::{DispatchOutcome, DispatchRequest, Dispatcher};
//!
//! #[tokio::main]
//! async fn main() -> adguard_dispatch::Result<()> {
//!     let dispatcher = Dispatcher::builder().from_env()?.build_http()?;
//!
//!     let ctx = dispatcher.context();
//!     match dispatcher.dispatch(DispatchRequest::get("/oapi/v1/devices"), &ctx).await {
//!         DispatchOutcome::Success(resp) => println!("{}", resp.text()),
//!         DispatchOutcome::RateLimited => eprintln!("queue full, try later"),
//!         other => eprintln!("failed: {}", other.label()),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Dispatcher`] orchestrator, builder, call stats and signals |
//! | [`resilience`] | Fixed-window rate limiter, waiter queue, retry policy |
//! | [`pipeline`] | Ordered stage chain in front of the transport |
//! | [`transport`] | Transport seam and the reqwest-backed HTTP transport |
//! | [`types`] | Requests, responses, context and outcomes |
//! | [`config`] | Dispatch policy, YAML/JSON/env loading |
//! | [`clock`] | Injectable time source |

pub mod client;
pub mod clock;
pub mod config;
pub mod pipeline;
pub mod resilience;
pub mod transport;
pub mod types;

pub use client::{CallStats, Dispatcher, DispatcherBuilder, SignalsSnapshot};
pub use config::DispatchPolicy;
pub use resilience::rate_limiter::{RateLimiter, RateLimiterConfig};
pub use resilience::retry::{RetryConfig, RetryPolicy, RetryState};
pub use transport::{HttpTransport, HttpTransportConfig, Transport, TransportError};
pub use types::{
    DispatchContext, DispatchOutcome, DispatchRequest, DispatchResponse, FailureCause,
    FailureKind,
};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
