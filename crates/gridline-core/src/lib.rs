//! Gridline Core - real-time synchronization for large editable row grids
//!
//! This crate provides the building blocks shared by the gridline server and
//! client:
//!
//! - **Row**: Dynamic rows keyed by integer id, carrying a store-assigned version
//! - **Schema**: Column definitions and validation of proposed values
//! - **Store**: The row store contract with in-memory and SQLite backends
//! - **Cache**: Insertion-ordered client row cache with change observers
//! - **Coordinator**: Optimistic edits with rollback and canonical convergence
//! - **Broadcast**: Cross-process fan-out of confirmed changes over a relay
//! - **Projector**: Windowed projection of an arbitrarily long row sequence
//! - **Protocol**: Push messages and error bodies on the wire
//! - **Config**: Projection, server and client settings
//!
//! # Data flow
//!
//! ```text
//! edit → Coordinator → Cache (optimistic)
//!      → Store.patch_row → Broadcaster.publish → Relay
//!      → every process → every client → Cache.replace (canonical)
//! ```

pub mod broadcast;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod projector;
pub mod protocol;
pub mod row;
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
pub mod store;

pub use broadcast::{
    BroadcastEvent, BroadcastSubscription, Broadcaster, MemoryRelay, Relay, RelayEnvelope,
};
pub use cache::{CacheChange, LocalRowCache, ReplaceOutcome, RowSequence, SubscriptionId};
pub use config::{ClientConfig, ConfigError, GridlineConfig, ProjectorConfig, ServerConfig};
pub use coordinator::{
    FailureNotice, MutationCoordinator, MutationStatus, OptimisticMutation, Resolution, Ticket,
    UpdateFailure, UpdateRequest,
};
pub use error::{GridlineError, RelayError, Result, StoreError, ValidationError};
pub use projector::{FixedSize, SizeEstimator, ViewportWindow, WindowItem, WindowProjector};
pub use protocol::{ErrorBody, HealthStatus, ServerMessage};
pub use row::{FieldChanges, Row, RowId, Value};
pub use schema::{ColumnDef, ColumnKind, Schema};
#[cfg(feature = "sqlite")]
pub use sqlite_store::SqliteRowStore;
pub use store::{MemoryRowStore, RowStore};

/// Returns the version of gridline-core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
