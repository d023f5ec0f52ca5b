use crate::resilience::retry::RetryState;

/// Per-call statistics, returned next to the outcome by
/// [`Dispatcher::dispatch_with_stats`](crate::client::Dispatcher::dispatch_with_stats).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStats {
    pub correlation_id: String,
    /// Attempts that were started, including the first.
    pub attempts: u32,
    pub state: RetryState,
    /// Status of the final response, when the upstream answered.
    pub http_status: Option<u16>,
    pub duration_ms: u64,
    pub retry_delays_ms: Vec<u64>,
    /// Total time spent queued for rate-limit permits across attempts.
    pub queued_ms: u64,
}
