//! Error types for the oracle client

use thiserror::Error;

/// Failure of a single `generate` call.
///
/// Callers only need to distinguish three cases: the oracle could not be
/// reached within the retry budget, the oracle refused the request, or the
/// oracle answered without usable text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationFailure {
    /// Connection/timeout/server errors persisted through every attempt.
    #[error("oracle unavailable after {attempts} attempt(s): {last_error}")]
    Transient { attempts: u32, last_error: String },

    /// Client-class error; retrying would not help.
    #[error("oracle rejected request{}: {message}", .status.map(|s| format!(" (HTTP {s})")).unwrap_or_default())]
    Rejected { status: Option<u16>, message: String },

    /// Success status, but no generated text could be found in the body.
    #[error("oracle returned malformed response: {0}")]
    MalformedResponse(String),
}

impl GenerationFailure {
    /// Whether the failure came from exhausting retries on transient errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationFailure::Transient { .. })
    }
}

/// Low-level transport failure for one HTTP exchange.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request did not complete before the client timeout.
    #[error("request timed out")]
    Timeout,

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection dropped while sending the request or reading the body.
    #[error("connection interrupted: {0}")]
    Interrupted(String),

    /// Any other transport-level failure (TLS, decoding, ...).
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Connection-class errors and timeouts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout | TransportError::Connect(_) | TransportError::Interrupted(_)
        )
    }

    fn classify(timeout: bool, connect: bool, interrupted: bool, message: String) -> Self {
        if timeout {
            TransportError::Timeout
        } else if connect {
            TransportError::Connect(message)
        } else if interrupted {
            TransportError::Interrupted(message)
        } else {
            TransportError::Other(message)
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::classify(
            err.is_timeout(),
            err.is_connect(),
            err.is_request() || err.is_body(),
            err.to_string(),
        )
    }
}

/// Errors building an oracle client from configuration.
#[derive(Error, Debug)]
pub enum OracleConfigError {
    /// No API key was supplied.
    #[error("oracle API key is not configured (set GEMINI_API_KEY)")]
    MissingApiKey,

    /// The proxy URL could not be parsed.
    #[error("invalid proxy URL {url}: {reason}")]
    InvalidProxy { url: String, reason: String },

    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(String),
}
