//! Shared test helpers: a scripted in-memory transport and tracing setup.
#![allow(dead_code)]

use adguard_dispatch::transport::{Transport, TransportError};
use adguard_dispatch::types::{DispatchContext, DispatchRequest, DispatchResponse};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    Body(u16, &'static str),
    RetryAfter(u16, u64),
    Timeout,
    Connect,
    /// Never answers; the attempt has to be timed out or cancelled.
    Hang,
}

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub at: Instant,
    pub correlation_id: String,
}

/// Answers from a script, then with `200 {}` once the script runs out.
/// Requests whose path starts with `/missing` always get 404.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedTransport {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn ok() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Arrival offsets relative to `start`.
    pub fn offsets(&self, start: Instant) -> Vec<Duration> {
        self.calls().iter().map(|c| c.at - start).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
    ) -> Result<DispatchResponse, TransportError> {
        self.calls.lock().unwrap().push(Call {
            path: request.path.clone(),
            at: Instant::now(),
            correlation_id: ctx.correlation_id().to_string(),
        });
        if request.path.starts_with("/missing") {
            return Ok(DispatchResponse::new(404, "not found"));
        }
        let step = self.script.lock().unwrap().pop_front();
        match step {
            None => Ok(DispatchResponse::new(200, "{}")),
            Some(Step::Status(status)) => Ok(DispatchResponse::new(status, "")),
            Some(Step::Body(status, body)) => Ok(DispatchResponse::new(status, body)),
            Some(Step::RetryAfter(status, secs)) => Ok(DispatchResponse::new(status, "")
                .with_header("Retry-After", secs.to_string())),
            Some(Step::Timeout) => Err(TransportError::Timeout("read timed out".into())),
            Some(Step::Connect) => Err(TransportError::Connect("connection refused".into())),
            Some(Step::Hang) => {
                std::future::pending::<()>().await;
                Ok(DispatchResponse::new(200, "{}"))
            }
        }
    }
}
