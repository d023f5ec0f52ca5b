use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use reqwest::Method;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

/// A single outbound API call, independent of the transport that sends it.
///
/// Requests are cheap to clone; the retry loop builds a fresh one per attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub method: Method,
    /// Path relative to the transport's base URL, e.g. `/oapi/v1/devices`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
}

impl DispatchRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Application-level checks run before the request reaches the network.
    pub fn validate(&self) -> Result<()> {
        if !self.path.starts_with('/') {
            return Err(Error::validation_with_context(
                "request path must start with '/'",
                ErrorContext::new()
                    .with_field_path("request.path")
                    .with_details(self.path.clone())
                    .with_source("request_validator"),
            ));
        }
        if self.path.contains("://") {
            return Err(Error::validation_with_context(
                "request path must be relative to the API base URL",
                ErrorContext::new()
                    .with_field_path("request.path")
                    .with_source("request_validator"),
            ));
        }
        if let Some((name, _)) = self.headers.iter().find(|(name, _)| name.trim().is_empty()) {
            return Err(Error::validation_with_context(
                "header name must be non-empty",
                ErrorContext::new()
                    .with_field_path("request.headers")
                    .with_details(format!("{:?}", name))
                    .with_source("request_validator"),
            ));
        }
        Ok(())
    }
}

/// Raw response returned by the transport.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DispatchResponse {
    pub status: u16,
    /// Header names are lower-cased.
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl DispatchResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Best-effort parsing of `Retry-After`.
    ///
    /// Only the `Retry-After: <seconds>` form is understood; HTTP dates are ignored.
    pub fn retry_after(&self) -> Option<Duration> {
        let secs: u64 = self.header("retry-after")?.parse().ok()?;
        Some(Duration::from_secs(secs))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
