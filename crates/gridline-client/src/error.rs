//! Error types for gridline-client

use thiserror::Error;

use gridline_core::ValidationError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed before a response arrived
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("Server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Push channel failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Unparseable push message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Edit rejected locally
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The session event loop has stopped
    #[error("Session closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let err = ClientError::Status {
            status: 404,
            message: "Row not found".into(),
        };
        assert_eq!(err.to_string(), "Server returned 404: Row not found");
    }

    #[test]
    fn validation_errors_convert() {
        let err: ClientError = ValidationError::UnknownRow(3).into();
        assert!(matches!(err, ClientError::Validation(ValidationError::UnknownRow(3))));
    }
}
