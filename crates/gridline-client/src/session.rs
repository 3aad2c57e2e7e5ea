//! Client session event loop.
//!
//! One task owns the [`MutationCoordinator`] and the [`WindowProjector`].
//! User edits, update responses, push messages and re-reads all arrive as
//! [`SessionEvent`]s on a single channel and are handled one at a time.
//! Network work runs in spawned tasks that post their results back.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use gridline_core::{
    CacheChange, FailureNotice, GridlineConfig, LocalRowCache, MutationCoordinator,
    ProjectorConfig, Resolution, Row, RowId, Schema, ServerMessage, Ticket, UpdateFailure,
    ValidationError, Value, ViewportWindow, WindowProjector,
};

use crate::error::{ClientError, Result};
use crate::realtime::PushStream;
use crate::transport::HttpRowApi;

type Inspector = Box<dyn FnOnce(&MutationCoordinator) + Send>;

/// Everything the session loop reacts to.
pub enum SessionEvent {
    Edit {
        row_id: RowId,
        field: String,
        value: Value,
        reply: oneshot::Sender<std::result::Result<Option<Ticket>, ValidationError>>,
    },
    Response {
        ticket: Ticket,
        result: std::result::Result<Row, UpdateFailure>,
    },
    Push(ServerMessage),
    Rehydrate(Vec<Row>),
    Disconnected,
    Reconnected {
        stream: PushStream,
        rows: Vec<Row>,
    },
    Project {
        scroll_offset: f64,
        viewport_height: f64,
        reply: oneshot::Sender<VisibleRows>,
    },
    Measure {
        index: usize,
        size: f64,
        reply: oneshot::Sender<f64>,
    },
    Observe(mpsc::UnboundedSender<CacheChange>),
    Inspect(Inspector),
    Shutdown,
}

/// A projected window together with the rows it covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VisibleRows {
    pub window: ViewportWindow,
    /// Rows for `window.start_index..window.end_index`.
    pub rows: Vec<Row>,
}

/// Cloneable handle for talking to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.events.is_closed())
            .finish()
    }
}

impl SessionHandle {
    fn send(&self, event: SessionEvent) -> Result<()> {
        self.events.send(event).map_err(|_| ClientError::Closed)
    }

    /// Propose an edit. The cell shows the new value as soon as this returns
    /// `Ok(Some(_))`; `Ok(None)` means the value was already current.
    pub async fn edit(
        &self,
        row_id: RowId,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Result<Option<Ticket>> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Edit {
            row_id,
            field: field.into(),
            value: value.into(),
            reply,
        })?;
        Ok(rx.await.map_err(|_| ClientError::Closed)??)
    }

    /// Run a read-only closure against the coordinator inside the loop.
    pub async fn inspect<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&MutationCoordinator) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.send(SessionEvent::Inspect(Box::new(move |coordinator| {
            let _ = tx.send(f(coordinator));
        })))?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    pub async fn row(&self, row_id: RowId) -> Result<Option<Row>> {
        self.inspect(move |c| c.cache().get(row_id).cloned()).await
    }

    pub async fn rows(&self) -> Result<Vec<Row>> {
        self.inspect(|c| c.cache().snapshot().iter().cloned().collect())
            .await
    }

    pub async fn pending_edits(&self) -> Result<usize> {
        self.inspect(|c| c.pending().count()).await
    }

    /// Project the viewport and return the rows to render.
    pub async fn visible_rows(&self, scroll_offset: f64, viewport_height: f64) -> Result<VisibleRows> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Project {
            scroll_offset,
            viewport_height,
            reply,
        })?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Report a rendered row size; returns the scroll correction to apply.
    pub async fn measure(&self, index: usize, size: f64) -> Result<f64> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionEvent::Measure { index, size, reply })?;
        rx.await.map_err(|_| ClientError::Closed)
    }

    /// Stream of cache changes, for incremental re-rendering.
    pub fn changes(&self) -> Result<mpsc::UnboundedReceiver<CacheChange>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.send(SessionEvent::Observe(tx))?;
        Ok(rx)
    }

    /// Discard the cache and re-read every row.
    pub fn resync(&self) -> Result<()> {
        self.send(SessionEvent::Push(ServerMessage::Resync))
    }
}

/// A connected client session.
pub struct GridSession {
    handle: SessionHandle,
    notices: mpsc::UnboundedReceiver<FailureNotice>,
    task: Option<JoinHandle<()>>,
}

impl GridSession {
    /// Open the push channel, read all rows and start the event loop.
    ///
    /// The push channel is opened before the bulk read so no confirmed
    /// change can fall between the two.
    pub async fn connect(config: &GridlineConfig) -> Result<Self> {
        let api = HttpRowApi::new(&config.client)?;
        let stream = PushStream::connect(&api.ws_url()).await?;
        let rows = api.list_rows().await?;
        tracing::info!("Session started with {} rows from {}", rows.len(), api.base_url());

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices) = mpsc::unbounded_channel();

        let reader = spawn_reader(stream, events_tx.clone());
        let state = SessionLoop {
            coordinator: MutationCoordinator::new(Schema::tracker(), LocalRowCache::with_rows(rows)),
            projector: WindowProjector::new(),
            projector_config: config.projector.clone(),
            api,
            events: events_tx.clone(),
            notices: notices_tx,
            reconnect_delay: Duration::from_millis(config.client.reconnect_delay_ms),
            reconnecting: false,
            reader: Some(reader),
        };
        let task = tokio::spawn(state.run(events_rx));

        Ok(Self {
            handle: SessionHandle { events: events_tx },
            notices,
            task: Some(task),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Wait for the next failure notice.
    pub async fn next_notice(&mut self) -> Option<FailureNotice> {
        self.notices.recv().await
    }

    pub fn try_notice(&mut self) -> Option<FailureNotice> {
        self.notices.try_recv().ok()
    }

    /// Stop the event loop and wait for it to finish.
    pub async fn shutdown(mut self) {
        let _ = self.handle.send(SessionEvent::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for GridSession {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.handle.send(SessionEvent::Shutdown);
        }
    }
}

struct SessionLoop {
    coordinator: MutationCoordinator,
    projector: WindowProjector,
    projector_config: ProjectorConfig,
    api: HttpRowApi,
    events: mpsc::UnboundedSender<SessionEvent>,
    notices: mpsc::UnboundedSender<FailureNotice>,
    reconnect_delay: Duration,
    reconnecting: bool,
    reader: Option<JoinHandle<()>>,
}

impl SessionLoop {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            if !self.handle(event) {
                break;
            }
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        tracing::info!("Session closed");
    }

    /// Returns false when the loop should stop.
    fn handle(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Edit {
                row_id,
                field,
                value,
                reply,
            } => {
                let outcome = self.coordinator.propose_edit(row_id, &field, value);
                let ticket = match outcome {
                    Ok(Some(request)) => {
                        let ticket = request.ticket;
                        let api = self.api.clone();
                        let events = self.events.clone();
                        tokio::spawn(async move {
                            let result = api.patch_row(request.row_id, &request.changes).await;
                            let _ = events.send(SessionEvent::Response { ticket, result });
                        });
                        Ok(Some(ticket))
                    }
                    other => other.map(|_| None),
                };
                let _ = reply.send(ticket);
            }
            SessionEvent::Response { ticket, result } => {
                if let Resolution::RolledBack { notice, .. } =
                    self.coordinator.on_update_response(ticket, result)
                {
                    let _ = self.notices.send(notice);
                }
            }
            SessionEvent::Push(ServerMessage::RowUpdate { row }) => {
                self.coordinator.on_row_changed(row);
            }
            SessionEvent::Push(ServerMessage::Resync) => {
                tracing::info!("Resync requested, re-reading all rows");
                let api = self.api.clone();
                let events = self.events.clone();
                tokio::spawn(async move {
                    match api.list_rows().await {
                        Ok(rows) => {
                            let _ = events.send(SessionEvent::Rehydrate(rows));
                        }
                        Err(e) => tracing::warn!("Resync read failed: {}", e),
                    }
                });
            }
            SessionEvent::Rehydrate(rows) => {
                tracing::debug!("Rehydrating {} rows", rows.len());
                self.coordinator.rehydrate(rows);
            }
            SessionEvent::Disconnected => {
                tracing::info!("Push channel closed, reconnecting");
                self.reader = None;
                self.spawn_reconnect();
            }
            SessionEvent::Reconnected { stream, rows } => {
                tracing::info!("Push channel restored, rehydrating {} rows", rows.len());
                self.reconnecting = false;
                self.reader = Some(spawn_reader(stream, self.events.clone()));
                self.coordinator.rehydrate(rows);
            }
            SessionEvent::Project {
                scroll_offset,
                viewport_height,
                reply,
            } => {
                let cache = self.coordinator.cache();
                let window = self.projector.project(
                    cache.len(),
                    scroll_offset,
                    viewport_height,
                    &self.projector_config.estimator(),
                    self.projector_config.overscan,
                );
                let rows = cache
                    .snapshot()
                    .slice(window.start_index, window.end_index)
                    .cloned()
                    .collect();
                let _ = reply.send(VisibleRows { window, rows });
            }
            SessionEvent::Measure { index, size, reply } => {
                let _ = reply.send(self.projector.measure(index, size));
            }
            SessionEvent::Observe(tx) => {
                self.coordinator.subscribe(move |change| {
                    let _ = tx.send(change.clone());
                });
            }
            SessionEvent::Inspect(f) => f(&self.coordinator),
            SessionEvent::Shutdown => return false,
        }
        true
    }

    fn spawn_reconnect(&mut self) {
        if self.reconnecting {
            return;
        }
        self.reconnecting = true;

        let api = self.api.clone();
        let events = self.events.clone();
        let delay = self.reconnect_delay;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                if events.is_closed() {
                    return;
                }
                let stream = match PushStream::connect(&api.ws_url()).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::warn!("Reconnect failed: {}", e);
                        continue;
                    }
                };
                match api.list_rows().await {
                    Ok(rows) => {
                        let _ = events.send(SessionEvent::Reconnected { stream, rows });
                        return;
                    }
                    Err(e) => tracing::warn!("Re-read after reconnect failed: {}", e),
                }
            }
        });
    }
}

fn spawn_reader(mut stream: PushStream, events: mpsc::UnboundedSender<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = stream.next_message().await {
            match message {
                Ok(message) => {
                    if events.send(SessionEvent::Push(message)).is_err() {
                        return;
                    }
                }
                Err(ClientError::Serialization(e)) => {
                    tracing::warn!("Skipping unreadable push message: {}", e);
                }
                Err(e) => {
                    tracing::warn!("Push channel error: {}", e);
                    break;
                }
            }
        }
        let _ = events.send(SessionEvent::Disconnected);
    })
}
