//! Cross-process fan-out of confirmed row changes.
//!
//! Every server process owns one [`Broadcaster`]. Publishing sends the
//! canonical row through the shared [`Relay`]; each broadcaster pumps relay
//! envelopes (its own included) into a bounded local channel that connected
//! clients subscribe to.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::error::RelayError;
use crate::row::Row;

/// A confirmed row change as carried by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    /// Process that committed the change.
    pub origin: String,
    pub row: Row,
}

/// Pub/sub channel shared by all server processes.
///
/// Implementations must deliver envelopes for the same row in publish order.
pub trait Relay: Send + Sync {
    fn publish(&self, envelope: RelayEnvelope) -> Result<(), RelayError>;

    /// Open a new feed receiving every envelope published from now on.
    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayEnvelope>, RelayError>;
}

/// In-process relay. Clones share the same subscriber set.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    feeds: Arc<Mutex<Vec<mpsc::UnboundedSender<RelayEnvelope>>>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.lock().map(|feeds| feeds.len()).unwrap_or(0)
    }
}

impl Relay for MemoryRelay {
    fn publish(&self, envelope: RelayEnvelope) -> Result<(), RelayError> {
        let mut feeds = self
            .feeds
            .lock()
            .map_err(|e| RelayError::Transport(e.to_string()))?;
        // Sending under the lock keeps a single global order.
        feeds.retain(|feed| feed.send(envelope.clone()).is_ok());
        Ok(())
    }

    fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<RelayEnvelope>, RelayError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds
            .lock()
            .map_err(|e| RelayError::Transport(e.to_string()))?
            .push(tx);
        Ok(rx)
    }
}

/// Event yielded to a local subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum BroadcastEvent {
    RowChanged(Row),
    /// The subscriber fell behind and missed this many changes.
    Lagged(u64),
}

/// Per-process broadcaster.
pub struct Broadcaster {
    process_id: String,
    relay: Arc<dyn Relay>,
    local: broadcast::Sender<Row>,
    pump: JoinHandle<()>,
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("process_id", &self.process_id)
            .field("subscribers", &self.local.receiver_count())
            .finish()
    }
}

impl Broadcaster {
    /// Subscribe to the relay and start pumping into the local channel.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        process_id: impl Into<String>,
        relay: Arc<dyn Relay>,
        buffer: usize,
    ) -> Result<Self, RelayError> {
        let process_id = process_id.into();
        let (local, _) = broadcast::channel(buffer.max(1));
        let mut feed = relay.subscribe()?;

        let sender = local.clone();
        let pid = process_id.clone();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = feed.recv().await {
                tracing::debug!(
                    "Process {} relaying row {} (version {}) from {}",
                    pid,
                    envelope.row.id,
                    envelope.row.version,
                    envelope.origin
                );
                // No local subscribers is not an error.
                let _ = sender.send(envelope.row);
            }
            tracing::error!("Relay feed closed for process {}", pid);
        });

        Ok(Self {
            process_id,
            relay,
            local,
            pump,
        })
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Fan out a committed row to every process.
    pub fn publish(&self, row: Row) -> Result<(), RelayError> {
        tracing::debug!("Publishing row {} version {}", row.id, row.version);
        self.relay
            .publish(RelayEnvelope {
                origin: self.process_id.clone(),
                row,
            })
            .inspect_err(|e| tracing::error!("Relay publish failed: {}", e))
    }

    pub fn subscribe(&self) -> BroadcastSubscription {
        BroadcastSubscription {
            rx: self.local.subscribe(),
        }
    }

    /// Number of live local subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.local.receiver_count()
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

/// One client's view of the local change stream.
#[derive(Debug)]
pub struct BroadcastSubscription {
    rx: broadcast::Receiver<Row>,
}

impl BroadcastSubscription {
    /// Next event, or `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<BroadcastEvent> {
        match self.rx.recv().await {
            Ok(row) => Some(BroadcastEvent::RowChanged(row)),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                Some(BroadcastEvent::Lagged(missed))
            }
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}
