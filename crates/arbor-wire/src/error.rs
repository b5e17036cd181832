//! Error types for arbor-wire

use thiserror::Error;

/// Result type alias using arbor-wire Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to the system of record
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// A single transport frame could not be parsed
    #[error("Malformed frame {line:?}: {source}")]
    MalformedFrame {
        line: String,
        #[source]
        source: serde_json::Error,
    },

    /// The response stream failed mid-read
    #[error("Stream error: {0}")]
    Stream(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create an API error from a status code and message
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is transient (useful for wording a failure notice)
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::Stream(_) => true,
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// Check if this error is a per-frame parse failure
    pub fn is_frame_error(&self) -> bool {
        matches!(self, Error::MalformedFrame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_server_statuses() {
        assert!(Error::api(429, "slow down").is_retryable());
        assert!(Error::api(502, "bad gateway").is_retryable());
        assert!(Error::api(503, "unavailable").is_retryable());
        assert!(Error::Stream("connection reset".into()).is_retryable());
    }

    #[test]
    fn test_not_retryable_client_statuses() {
        assert!(!Error::api(400, "bad request").is_retryable());
        assert!(!Error::api(404, "no such conversation").is_retryable());
        assert!(!Error::InvalidConfig("missing base url".into()).is_retryable());
    }

    #[test]
    fn test_malformed_frame_is_frame_error() {
        let source = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let e = Error::MalformedFrame {
            line: "data: {oops".into(),
            source,
        };
        assert!(e.is_frame_error());
        assert!(e.to_string().contains("data: {oops"));
        assert!(!Error::api(500, "boom").is_frame_error());
    }
}
