//! Retrying oracle client.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::config::{GenerationParams, OracleConfig};
use crate::error::{GenerationFailure, OracleConfigError};
use crate::transport::{HttpTransport, OracleTransport};
use crate::wire::{extract_text, GenerateRequest};
use crate::Oracle;

/// Stateless request/response wrapper that owns the retry policy.
///
/// | Condition                         | Action                         |
/// |-----------------------------------|--------------------------------|
/// | timeout / connection error        | retry with backoff             |
/// | 5xx                               | retry with backoff             |
/// | other non-200 (4xx, 3xx, ...)     | `Rejected`, no retry           |
/// | 200 without usable text           | `MalformedResponse`, no retry  |
/// | other transport error (TLS, ...)  | `Rejected`, no retry           |
pub struct OracleClient {
    config: OracleConfig,
    transport: Arc<dyn OracleTransport>,
}

impl OracleClient {
    /// Create a client that talks HTTP using `config`.
    pub fn new(config: OracleConfig) -> Result<Self, OracleConfigError> {
        let transport = HttpTransport::new(&config)?;
        Ok(OracleClient {
            config,
            transport: Arc::new(transport),
        })
    }

    /// Create a client over an injected transport.
    pub fn with_transport(config: OracleConfig, transport: Arc<dyn OracleTransport>) -> Self {
        OracleClient { config, transport }
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    async fn generate_with_retry(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationFailure> {
        if prompt.trim().is_empty() {
            return Err(GenerationFailure::Rejected {
                status: None,
                message: "prompt must not be empty".to_string(),
            });
        }

        let request = GenerateRequest::user(prompt, params);
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            debug!(attempt, max_attempts, model = %self.config.model, "calling oracle");

            match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    return extract_text(&response.body);
                }
                Ok(response) if response.is_server_error() => {
                    last_error = format!("HTTP {}: {}", response.status, truncate(&response.body));
                }
                Ok(response) => {
                    return Err(GenerationFailure::Rejected {
                        status: Some(response.status),
                        message: truncate(&response.body),
                    });
                }
                Err(err) if err.is_retryable() => {
                    last_error = err.to_string();
                }
                Err(err) => {
                    return Err(GenerationFailure::Rejected {
                        status: None,
                        message: err.to_string(),
                    });
                }
            }

            if attempt < max_attempts {
                let delay = self.config.backoff_delay(attempt);
                warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %last_error,
                    "transient oracle failure, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }

        Err(GenerationFailure::Transient {
            attempts: max_attempts,
            last_error,
        })
    }
}

#[async_trait]
impl Oracle for OracleClient {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationFailure> {
        self.generate_with_retry(prompt, params).await
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 500;
    if body.chars().count() <= LIMIT {
        body.to_string()
    } else {
        let head: String = body.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}
