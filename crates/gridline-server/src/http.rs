//! HTTP endpoint handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::PathRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use gridline_core::{ErrorBody, FieldChanges, HealthStatus, Row, RowId, StoreError};

use crate::AppState;

/// Error returned by every handler, rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Row not found"),
            StoreError::Validation(e) => Self::bad_request(e.to_string()),
            StoreError::AlreadyExists(id) => {
                Self::new(StatusCode::CONFLICT, format!("Row already exists: {}", id))
            }
            StoreError::Storage(msg) => {
                tracing::error!("Row store failure: {}", msg);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.message))).into_response()
    }
}

/// Health check
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok".to_string(),
        service: state.service.clone(),
        process_id: state.broadcaster.process_id().to_string(),
        subscribers: state.broadcaster.subscriber_count(),
    })
}

/// All rows in ascending id order
pub async fn list_rows(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Row>>, ApiError> {
    let store = Arc::clone(&state.store);
    let rows = tokio::task::spawn_blocking(move || store.list_rows())
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;
    Ok(Json(rows))
}

/// Apply changed fields to one row, then fan the canonical row out.
pub async fn patch_row(
    State(state): State<Arc<AppState>>,
    id: Result<Path<RowId>, PathRejection>,
    body: Result<Json<FieldChanges>, JsonRejection>,
) -> Result<Json<Row>, ApiError> {
    let Path(id) = id.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let Json(changes) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if changes.is_empty() {
        return Err(ApiError::bad_request("No fields to update"));
    }

    let _guard = state.row_locks.lock(id).await;

    let store = Arc::clone(&state.store);
    let row = tokio::task::spawn_blocking(move || store.patch_row(id, &changes))
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))??;
    tracing::debug!("Committed row {} at version {}", row.id, row.version);

    // The commit stands even if fan-out fails; clients recover on resync.
    if let Err(e) = state.broadcaster.publish(row.clone()) {
        tracing::error!("Failed to publish row {}: {}", row.id, e);
    }

    Ok(Json(row))
}
