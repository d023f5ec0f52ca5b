use super::request::DispatchResponse;
use std::fmt;
use std::time::Duration;

/// What went wrong on a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Could not reach the upstream (DNS, refused, reset).
    Connect,
    /// The request or response timed out in the transport.
    Timeout,
    /// The upstream answered with a non-success HTTP status.
    Status,
    /// The response could not be read or decoded.
    Malformed,
    /// The request was rejected before it reached the network.
    Validation,
    /// Internal dispatcher fault (e.g. poisoned limiter state).
    Internal,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Connect => "connect",
            FailureKind::Timeout => "timeout",
            FailureKind::Status => "status",
            FailureKind::Malformed => "malformed",
            FailureKind::Validation => "validation",
            FailureKind::Internal => "internal",
            FailureKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureCause {
    pub kind: FailureKind,
    pub message: String,
    /// HTTP status, when the upstream answered.
    pub status: Option<u16>,
    /// Server-requested delay before the next attempt (`Retry-After`).
    pub retry_after: Option<Duration>,
}

impl FailureCause {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    pub fn from_response(response: &DispatchResponse) -> Self {
        Self {
            kind: FailureKind::Status,
            message: response.text(),
            status: Some(response.status),
            retry_after: response.retry_after(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} (HTTP {}): {}", self.kind.as_str(), status, self.message),
            None => write!(f, "{}: {}", self.kind.as_str(), self.message),
        }
    }
}

/// Terminal result of one logical dispatch. Every call resolves to exactly one.
///
/// `T` defaults to the raw [`DispatchResponse`]; typed helpers such as
/// [`Dispatcher::dispatch_json`](crate::client::Dispatcher::dispatch_json)
/// decode the body into `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome<T = DispatchResponse> {
    Success(T),
    /// Admission denied: the limiter's queue was full or the limit is zero.
    RateLimited,
    /// Retryable failure; returned once retries are exhausted.
    TransientFailure(FailureCause),
    /// Non-retryable failure; returned as soon as it is observed.
    PermanentFailure(FailureCause),
    Cancelled,
    /// The overall deadline elapsed before the operation could finish.
    TimedOut,
}

impl<T> DispatchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, DispatchOutcome::Success(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchOutcome::TransientFailure(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            DispatchOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            DispatchOutcome::TransientFailure(cause) | DispatchOutcome::PermanentFailure(cause) => {
                Some(cause)
            }
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DispatchOutcome<U> {
        self.and_then(|value| DispatchOutcome::Success(f(value)))
    }

    /// Chain a fallible step onto a success; failures pass through unchanged.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> DispatchOutcome<U>) -> DispatchOutcome<U> {
        match self {
            DispatchOutcome::Success(value) => f(value),
            DispatchOutcome::RateLimited => DispatchOutcome::RateLimited,
            DispatchOutcome::TransientFailure(c) => DispatchOutcome::TransientFailure(c),
            DispatchOutcome::PermanentFailure(c) => DispatchOutcome::PermanentFailure(c),
            DispatchOutcome::Cancelled => DispatchOutcome::Cancelled,
            DispatchOutcome::TimedOut => DispatchOutcome::TimedOut,
        }
    }

    /// Short label for logs and stats.
    pub fn label(&self) -> &'static str {
        match self {
            DispatchOutcome::Success(_) => "success",
            DispatchOutcome::RateLimited => "rate_limited",
            DispatchOutcome::TransientFailure(_) => "transient_failure",
            DispatchOutcome::PermanentFailure(_) => "permanent_failure",
            DispatchOutcome::Cancelled => "cancelled",
            DispatchOutcome::TimedOut => "timed_out",
        }
    }
}
