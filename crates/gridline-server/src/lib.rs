//! Gridline Server - row edit API and change fan-out
//!
//! HTTP endpoints for reading and patching rows, plus a WebSocket channel
//! that pushes every confirmed change to connected clients. Any number of
//! server processes can run side by side as long as they share a relay.

pub mod http;
pub mod locks;
pub mod websocket;

use std::path::Path;
use std::sync::Arc;

use axum::{
    routing::{get, patch},
    Router,
};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use gridline_core::{
    Broadcaster, GridlineError, MemoryRowStore, Relay, RowStore, Schema, ServerConfig,
};

pub use locks::RowLocks;

/// Shared application state
pub struct AppState {
    pub store: Arc<dyn RowStore>,
    pub broadcaster: Broadcaster,
    pub row_locks: RowLocks,
    /// Name reported by the health endpoint
    pub service: String,
}

impl AppState {
    pub fn new(store: Arc<dyn RowStore>, broadcaster: Broadcaster) -> Self {
        Self {
            store,
            broadcaster,
            row_locks: RowLocks::new(),
            service: "gridline".to_string(),
        }
    }

    /// Build state from configuration.
    ///
    /// Opens the SQLite store when a database path is configured, otherwise
    /// starts with an empty in-memory store.
    pub fn from_config(config: &ServerConfig, relay: Arc<dyn Relay>) -> Result<Self, GridlineError> {
        let store: Arc<dyn RowStore> = match &config.database_path {
            Some(path) => open_store(Path::new(path))?,
            None => {
                tracing::warn!("No database configured, using an empty in-memory store");
                Arc::new(MemoryRowStore::new(Schema::tracker()))
            }
        };
        let broadcaster =
            Broadcaster::start(config.process_id.clone(), relay, config.subscriber_buffer)?;
        Ok(Self::new(store, broadcaster))
    }
}

#[cfg(feature = "sqlite")]
fn open_store(path: &Path) -> Result<Arc<dyn RowStore>, GridlineError> {
    let store = gridline_core::SqliteRowStore::open(path, Schema::tracker())?;
    tracing::info!("Opened row store at {}", path.display());
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_store(path: &Path) -> Result<Arc<dyn RowStore>, GridlineError> {
    Err(gridline_core::StoreError::Storage(format!(
        "cannot open {}: built without sqlite support",
        path.display()
    ))
    .into())
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(http::health))
        // Row endpoints
        .route("/rows", get(http::list_rows))
        .route("/rows/{id}", patch(http::patch_row))
        // WebSocket
        .route("/ws", get(websocket::ws_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Start the server
pub async fn serve(addr: &str, state: Arc<AppState>) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_on(listener, state).await?;
    Ok(())
}

/// Serve on an already bound listener.
pub async fn serve_on(listener: tokio::net::TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let app = create_router(state.clone());
    tracing::info!(
        "Gridline server {} listening on {}",
        state.broadcaster.process_id(),
        listener.local_addr()?
    );
    axum::serve(listener, app).await
}
