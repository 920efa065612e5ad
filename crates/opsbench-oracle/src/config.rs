//! Oracle client configuration
//!
//! Everything the client needs is carried by [`OracleConfig`]; nothing is read
//! from the process environment unless the caller asks for it through
//! [`OracleConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default generative-language API root.
pub const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default model used for synthesis and classification.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Oracle client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleConfig {
    /// API root, without the `/models/...` suffix
    pub endpoint: String,
    /// Model name
    pub model: String,
    /// API key sent as `X-goog-api-key`
    pub api_key: String,
    /// Proxy applied to all requests (e.g. `http://127.0.0.1:7890`)
    pub proxy: Option<String>,
    /// Comma-separated hosts that bypass the proxy
    pub no_proxy: Option<String>,
    /// Per-request timeout (milliseconds)
    pub request_timeout_ms: u64,
    /// Total attempts per `generate` call (1 = no retries)
    pub max_attempts: u32,
    /// First backoff delay (milliseconds); doubles per retry
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay (milliseconds)
    pub backoff_cap_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: String::new(),
            proxy: None,
            no_proxy: None,
            request_timeout_ms: 60_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 8_000,
        }
    }
}

impl OracleConfig {
    /// Create a config for the given key with default settings
    pub fn new(api_key: &str) -> Self {
        OracleConfig {
            api_key: api_key.to_string(),
            ..Default::default()
        }
    }

    /// Read key, model and proxy settings from environment variables.
    ///
    /// Intended for binaries only; libraries should accept a config value.
    pub fn from_env() -> Self {
        let mut config = OracleConfig::new(&std::env::var("GEMINI_API_KEY").unwrap_or_default());
        if let Ok(model) = std::env::var("OPSBENCH_MODEL") {
            config.model = model;
        }
        config.proxy = std::env::var("HTTPS_PROXY")
            .or_else(|_| std::env::var("HTTP_PROXY"))
            .ok()
            .filter(|p| !p.is_empty());
        config.no_proxy = std::env::var("NO_PROXY").ok().filter(|p| !p.is_empty());
        config
    }

    /// Set the model name
    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Set the proxy URL
    pub fn with_proxy(mut self, proxy: &str) -> Self {
        self.proxy = Some(proxy.to_string());
        self
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set backoff base and cap
    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    /// Full `generateContent` URL for the configured model
    pub fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }

    /// Request timeout as a `Duration`
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// `base * 2^(attempt-1)`, capped at `backoff_cap_ms`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let delay = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(delay.min(self.backoff_cap_ms))
    }
}

/// Sampling parameters supplied per call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl GenerationParams {
    pub fn new(temperature: f32, max_output_tokens: u32) -> Self {
        Self {
            temperature,
            max_output_tokens,
        }
    }

    /// Low temperature, large budget: code synthesis.
    pub fn synthesis() -> Self {
        Self::new(0.2, 20_000)
    }

    /// Deterministic, short answers: outcome classification.
    pub fn classification() -> Self {
        Self::new(0.0, 2_048)
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::synthesis()
    }
}
