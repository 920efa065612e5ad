//! Transport seam between the retrying client and the network.
//!
//! The client never talks to `reqwest` directly; it sends a
//! [`GenerateRequest`] through an [`OracleTransport`], which makes the retry
//! policy testable with scripted transports.

use async_trait::async_trait;
use tracing::debug;

use crate::config::OracleConfig;
use crate::error::{OracleConfigError, TransportError};
use crate::wire::GenerateRequest;

/// Raw HTTP response: status code plus body text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// One request/response exchange with the oracle.
#[async_trait]
pub trait OracleTransport: Send + Sync {
    async fn send(&self, request: &GenerateRequest) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport.
pub struct HttpTransport {
    url: String,
    api_key: String,
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport from configuration (proxy and timeout included).
    pub fn new(config: &OracleConfig) -> Result<Self, OracleConfigError> {
        if config.api_key.trim().is_empty() {
            return Err(OracleConfigError::MissingApiKey);
        }

        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("opsbench-oracle/", env!("CARGO_PKG_VERSION")))
            .timeout(config.request_timeout());

        if let Some(proxy_url) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| OracleConfigError::InvalidProxy {
                    url: proxy_url.clone(),
                    reason: e.to_string(),
                })?
                .no_proxy(
                    config
                        .no_proxy
                        .as_deref()
                        .and_then(reqwest::NoProxy::from_string),
                );
            builder = builder.proxy(proxy);
        }

        let http_client = builder
            .build()
            .map_err(|e| OracleConfigError::HttpClient(e.to_string()))?;

        Ok(HttpTransport {
            url: config.generate_url(),
            api_key: config.api_key.clone(),
            http_client,
        })
    }
}

#[async_trait]
impl OracleTransport for HttpTransport {
    async fn send(&self, request: &GenerateRequest) -> Result<TransportResponse, TransportError> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header("X-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, body_len = body.len(), "oracle response received");

        Ok(TransportResponse { status, body })
    }
}
