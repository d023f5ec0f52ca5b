use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use uuid::Uuid;

/// Per-operation context threaded through every layer of the chain.
///
/// One context covers one logical operation, including all of its retry
/// attempts. Cancelling it aborts whatever the operation is currently
/// suspended on: a queued permit wait, a backoff delay, or the transport call.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    correlation_id: String,
    /// Total time spent queued for permits, shared with child contexts.
    queued_ms: Arc<AtomicU64>,
}

impl DispatchContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
            correlation_id: Uuid::new_v4().to_string(),
            queued_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Tie this context to an externally owned token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A context for a sub-operation: cancelled with its parent, never the other way round.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            correlation_id: self.correlation_id.clone(),
            queued_ms: self.queued_ms.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn record_queued(&self, waited: Duration) {
        self.queued_ms
            .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
    }

    /// Time this operation (and its children) spent waiting for permits.
    pub fn queued(&self) -> Duration {
        Duration::from_millis(self.queued_ms.load(Ordering::Relaxed))
    }
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self::new()
    }
}
