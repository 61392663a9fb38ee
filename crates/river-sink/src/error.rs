//! Error types for sink clients.

use thiserror::Error;

/// Errors that can occur while talking to the sink
#[derive(Error, Debug)]
pub enum SinkError {
    /// Connection or transfer failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The sink answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON encoding/decoding errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Endpoint could not be built from the configured URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The sink refused the call outright
    #[error("Sink unavailable: {0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SinkError::Status {
            status: 503,
            body: "busy".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 503: busy");

        let err = SinkError::Unavailable("down".to_string());
        assert_eq!(err.to_string(), "Sink unavailable: down");
    }

    #[test]
    fn test_from_serde_error() {
        let json_err = serde_json::from_str::<i32>("nope").unwrap_err();
        let err: SinkError = json_err.into();
        assert!(matches!(err, SinkError::Serialization(_)));
    }
}
