//! Gridline Client - live, optimistic view of a gridline server
//!
//! - **Transport**: reqwest calls for the bulk read and row patches
//! - **Realtime**: tokio-tungstenite subscription to pushed row changes
//! - **Session**: the event loop that owns the row cache and coordinator
//!
//! ```no_run
//! # async fn demo() -> gridline_client::Result<()> {
//! let config = gridline_core::GridlineConfig::default();
//! let mut session = gridline_client::GridSession::connect(&config).await?;
//! let grid = session.handle();
//!
//! grid.edit(7, "priority", "High").await?;
//! let visible = grid.visible_rows(0.0, 960.0).await?;
//! println!("rendering {} rows", visible.rows.len());
//!
//! if let Some(notice) = session.try_notice() {
//!     eprintln!("{}", notice.message);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod realtime;
pub mod session;
pub mod transport;

pub use error::{ClientError, Result};
pub use realtime::PushStream;
pub use session::{GridSession, SessionEvent, SessionHandle, VisibleRows};
pub use transport::HttpRowApi;
