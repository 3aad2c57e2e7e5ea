//! Wire types shared by the server and client.

use serde::{Deserialize, Serialize};

use crate::row::Row;

/// Message pushed to clients over the WebSocket channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A confirmed update, carrying the canonical row.
    RowUpdate { row: Row },
    /// Changes were missed; the client must re-read all rows.
    Resync,
}

/// Body of every non-2xx HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Response of the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub service: String,
    pub process_id: String,
    pub subscribers: usize,
}
