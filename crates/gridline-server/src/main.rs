//! Gridline Server Binary
//!
//! Standalone server process. Reads `GRIDLINE_CONFIG` (TOML or JSON path),
//! then lets `GRIDLINE_ADDR`, `GRIDLINE_DB` and `GRIDLINE_PROCESS_ID`
//! override individual settings.

use std::path::PathBuf;
use std::sync::Arc;

use gridline_core::{GridlineConfig, MemoryRelay};
use gridline_server::{serve, AppState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gridline=info")),
        )
        .init();

    let mut config = match std::env::var("GRIDLINE_CONFIG") {
        Ok(path) => GridlineConfig::load(&PathBuf::from(path))?,
        Err(_) => GridlineConfig::default(),
    };
    if let Ok(addr) = std::env::var("GRIDLINE_ADDR") {
        config.server.listen_addr = addr;
    }
    if let Ok(db) = std::env::var("GRIDLINE_DB") {
        config.server.database_path = Some(db);
    }
    if let Ok(process_id) = std::env::var("GRIDLINE_PROCESS_ID") {
        config.server.process_id = process_id;
    }
    config.validate()?;

    // A single process needs no external relay.
    let relay = Arc::new(MemoryRelay::new());
    let state = Arc::new(AppState::from_config(&config.server, relay)?);

    serve(&config.server.listen_addr, state).await
}
