//! OpsBench Oracle: text-generation client for code synthesis
//!
//! Wraps a remote `generateContent` endpoint behind the [`Oracle`] trait.
//! The concrete [`OracleClient`] owns the retry policy (exponential backoff
//! on connection, timeout and server errors; immediate failure on client
//! errors and malformed responses).
//!
//! ## Layers
//!
//! - [`config`] - `OracleConfig`, `GenerationParams`
//! - [`wire`] - request/response JSON format
//! - [`transport`] - `OracleTransport` seam and the `reqwest` implementation
//! - [`client`] - `OracleClient` retry loop
//! - [`error`] - `GenerationFailure`, `TransportError`, `OracleConfigError`

pub mod client;
pub mod config;
pub mod error;
pub mod transport;
pub mod wire;

use async_trait::async_trait;

pub use client::OracleClient;
pub use config::{GenerationParams, OracleConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use error::{GenerationFailure, OracleConfigError, TransportError};
pub use transport::{HttpTransport, OracleTransport, TransportResponse};
pub use wire::{extract_text, GenerateRequest};

/// A remote text generator.
///
/// `generate(prompt) -> text | GenerationFailure`. Implementations must not
/// have side effects beyond the call itself.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, GenerationFailure>;
}
