//! Network transport seam.
//!
//! The dispatcher only needs something that can send a [`DispatchRequest`] and
//! return a [`DispatchResponse`] or a [`TransportError`]. Retries and
//! connection pooling inside a transport are its own business.

pub mod http;

pub use http::{HttpTransport, HttpTransportConfig};

use crate::types::{DispatchContext, DispatchRequest, DispatchResponse};
use async_trait::async_trait;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
    ) -> std::result::Result<DispatchResponse, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Other(String),
}
