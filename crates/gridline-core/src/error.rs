//! Error types for gridline-core

use thiserror::Error;

use crate::row::RowId;

/// Result type alias for gridline operations
pub type Result<T> = std::result::Result<T, GridlineError>;

/// Main error type for gridline operations
#[derive(Error, Debug)]
pub enum GridlineError {
    /// Edit rejected before reaching the store
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Row store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cross-process relay failure
    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Reasons a proposed edit is rejected before any network call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Row not found: {0}")]
    UnknownRow(RowId),

    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Field is read-only: {0}")]
    ReadOnly(String),

    #[error("Field {field} expects {expected}, got {got:?}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("{value:?} is not a valid {field} (allowed: {})", .allowed.join(", "))]
    NotInEnum {
        field: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("No fields to update")]
    EmptyUpdate,
}

/// Errors from the row store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Row not found: {0}")]
    NotFound(RowId),

    #[error("Row already exists: {0}")]
    AlreadyExists(RowId),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors from the cross-process relay.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Relay closed")]
    Closed,

    #[error("Relay transport error: {0}")]
    Transport(String),

    #[error("Relay serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Storage(format!("serialization: {}", err))
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Serialization(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_display() {
        let err = StoreError::NotFound(42);
        assert!(err.to_string().contains("not found"));

        let err = StoreError::from(ValidationError::UnknownField("shoe_size".into()));
        assert!(err.to_string().contains("shoe_size"));
    }

    #[test]
    fn enum_error_lists_allowed_options() {
        let err = ValidationError::NotInEnum {
            field: "priority".into(),
            value: "Urgent".into(),
            allowed: vec!["High".into(), "Medium".into(), "Low".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("Urgent"));
        assert!(msg.contains("High, Medium, Low"));
    }

    #[test]
    fn errors_convert_into_gridline_error() {
        let err: GridlineError = StoreError::Storage("disk full".into()).into();
        assert!(matches!(err, GridlineError::Store(_)));
        let err: GridlineError = RelayError::Closed.into();
        assert!(err.to_string().contains("Relay"));
    }
}
