//! Request pipeline: an ordered list of stages in front of the transport.
//!
//! # Dispatch Chain
//!
//! Every outbound request flows through the stages in insertion order. Each
//! stage receives the request, the operation context and a [`Next`] handle for
//! the remainder of the chain. A stage may modify the request, suspend, or
//! answer on its own without calling `next` (the rate limiter rejects this way).
//!
//! ```text
//! Dispatcher ─► RateLimitedDispatcher ─► [extra stages] ─► Transport
//!      ▲                                                      │
//!      └────────────────── DispatchOutcome ◄──────────────────┘
//! ```
//!
//! The terminal step validates the request, races [`Transport::send`] against
//! cancellation, and classifies the response into a [`DispatchOutcome`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Stage`] | One link of the chain |
//! | [`Next`] | Handle to the rest of the chain |
//! | [`Pipeline`] | Stages plus the terminal transport step |
//! | [`rate_limited`] | Admission-control stage backed by the shared limiter |
//! | [`timeout`] | Per-attempt timeout stage |

pub mod rate_limited;
pub mod timeout;

pub use rate_limited::RateLimitedDispatcher;
pub use timeout::AttemptTimeout;

use crate::client::error_classification::{classify_response, classify_transport_error};
use crate::transport::Transport;
use crate::types::{DispatchContext, DispatchOutcome, DispatchRequest, FailureCause, FailureKind};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait Stage: Send + Sync {
    async fn process(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
        next: Next<'_>,
    ) -> DispatchOutcome;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// The part of the chain after the current stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: DispatchRequest, ctx: &DispatchContext) -> DispatchOutcome {
        match self.stages.split_first() {
            Some((stage, rest)) => {
                let next = Next {
                    stages: rest,
                    transport: self.transport,
                };
                stage.process(request, ctx, next).await
            }
            None => send_to_transport(self.transport, request, ctx).await,
        }
    }

    /// Stages left before the transport.
    pub fn remaining(&self) -> usize {
        self.stages.len()
    }
}

async fn send_to_transport(
    transport: &dyn Transport,
    request: DispatchRequest,
    ctx: &DispatchContext,
) -> DispatchOutcome {
    if let Err(e) = request.validate() {
        return DispatchOutcome::PermanentFailure(FailureCause::new(
            FailureKind::Validation,
            e.to_string(),
        ));
    }

    let method = request.method.clone();
    let path = request.path.clone();
    let result = tokio::select! {
        biased;
        _ = ctx.cancelled() => return DispatchOutcome::Cancelled,
        result = transport.send(request, ctx) => result,
    };

    let outcome = match result {
        Ok(response) => classify_response(response),
        Err(e) => classify_transport_error(&e),
    };
    debug!(
        correlation_id = ctx.correlation_id(),
        method = %method,
        path = path.as_str(),
        status = outcome.cause().and_then(|c| c.status),
        outcome = outcome.label(),
        "transport step finished"
    );
    outcome
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            stages: Vec::new(),
            transport,
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub async fn send(&self, request: DispatchRequest, ctx: &DispatchContext) -> DispatchOutcome {
        Next {
            stages: &self.stages,
            transport: self.transport.as_ref(),
        }
        .run(request, ctx)
        .await
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}
