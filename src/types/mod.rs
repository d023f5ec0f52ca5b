//! Core type definitions shared by every layer of the dispatch chain.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`DispatchRequest`] | Transport-agnostic description of one outbound HTTP call |
//! | [`DispatchResponse`] | Raw status, headers and body handed back to the caller |
//! | [`DispatchContext`] | End-to-end cancellation signal, deadline and correlation id |
//! | [`DispatchOutcome`] | Tagged terminal result of a dispatch |

pub mod context;
pub mod outcome;
pub mod request;

pub use context::DispatchContext;
pub use outcome::{DispatchOutcome, FailureCause, FailureKind};
pub use request::{DispatchRequest, DispatchResponse};
