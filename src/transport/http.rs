use super::{Transport, TransportError};
use crate::types::{DispatchContext, DispatchRequest, DispatchResponse};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::Proxy;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use tracing::debug;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.adguard-dns.io";

/// Header carrying the per-attempt correlation id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub base_url: Url,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub proxy_url: Option<String>,
}

impl HttpTransportConfig {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid API base URL: {}", e),
                ErrorContext::new()
                    .with_field_path("api_url")
                    .with_details(base_url.to_string())
                    .with_source("http_transport"),
            )
        })?;
        Ok(Self {
            base_url,
            api_key: None,
            timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 32,
            pool_idle_timeout: Duration::from_secs(90),
            proxy_url: None,
        })
    }

    /// Read connection settings from the environment.
    ///
    /// The base URL and token accept the standard `ADGUARD_API_*` names first,
    /// then the .NET-style and legacy names used by older tooling.
    pub fn from_env() -> Result<Self> {
        let base_url = first_env(&[
            "ADGUARD_API_BASE_URL",
            "ADGUARD_AdGuard__BaseUrl",
            "ADGUARD_API_URL",
        ])
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut config = Self::new(&base_url)?;
        config.api_key = first_env(&[
            "ADGUARD_API_KEY",
            "ADGUARD_AdGuard__ApiKey",
            "ADGUARD_API_TOKEN",
        ]);
        if let Some(secs) = env::var("ADGUARD_HTTP_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|s| *s > 0)
        {
            config.timeout = Duration::from_secs(secs);
        }
        config.proxy_url = env::var("ADGUARD_PROXY_URL").ok();
        Ok(config)
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

fn first_env(names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// reqwest-backed transport for the AdGuard DNS API.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url)
                .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self {
            client,
            base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
            api_key: config.api_key,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(HttpTransportConfig::from_env()?)
    }

    fn url_for(&self, path: &str) -> std::result::Result<Url, TransportError> {
        let raw = format!("{}{}", self.base_url, path);
        Url::parse(&raw).map_err(|e| TransportError::InvalidRequest(format!("{}: {}", raw, e)))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Http(e)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        request: DispatchRequest,
        ctx: &DispatchContext,
    ) -> std::result::Result<DispatchResponse, TransportError> {
        let url = self.url_for(&request.path)?;

        let mut req = self.client.request(request.method.clone(), url);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        if !request.query.is_empty() {
            req = req.query(&request.query);
        }
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        req = req.header(REQUEST_ID_HEADER, ctx.correlation_id());
        if let Some(body) = &request.body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let headers: HashMap<String, String> = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_error)?;

        debug!(
            method = %request.method,
            path = request.path.as_str(),
            status,
            correlation_id = ctx.correlation_id(),
            "adguard api call completed"
        );

        Ok(DispatchResponse {
            status,
            headers,
            body,
        })
    }
}
