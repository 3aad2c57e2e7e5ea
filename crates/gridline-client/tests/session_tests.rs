//! End-to-end session tests against in-process servers

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use gridline_client::{ClientError, GridSession, HttpRowApi, SessionHandle};
use gridline_core::{
    Broadcaster, CacheChange, FieldChanges, GridlineConfig, MemoryRelay, MemoryRowStore, Relay, Row, RowId,
    RowStore, Schema, ValidationError, Value,
};
use gridline_server::{serve_on, AppState};

fn seed(count: i64) -> Vec<Row> {
    (1..=count)
        .map(|id| {
            Row::new(id)
                .with_field("name", format!("Contact {}", id))
                .with_field("status", "Active")
                .with_field("priority", "Low")
        })
        .collect()
}

async fn spawn_process(id: &str, store: Arc<dyn RowStore>, relay: Arc<dyn Relay>) -> SocketAddr {
    let broadcaster = Broadcaster::start(id, relay, 256).unwrap();
    let state = Arc::new(AppState::new(store, broadcaster));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_on(listener, state));
    addr
}

fn config_for(addr: SocketAddr) -> GridlineConfig {
    let mut config = GridlineConfig::default();
    config.client.base_url = format!("http://{}", addr);
    config.client.reconnect_delay_ms = 50;
    config
}

async fn connect(addr: SocketAddr) -> GridSession {
    GridSession::connect(&config_for(addr)).await.unwrap()
}

/// TCP relay in front of a server whose connections can be cut.
struct Tunnel {
    addr: SocketAddr,
    open: Arc<AtomicBool>,
    links: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Tunnel {
    async fn start(upstream: SocketAddr) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let open = Arc::new(AtomicBool::new(true));
        let links = Arc::new(Mutex::new(Vec::new()));

        let (accepting, accepted) = (Arc::clone(&open), Arc::clone(&links));
        tokio::spawn(async move {
            while let Ok((mut inbound, _)) = listener.accept().await {
                if !accepting.load(Ordering::SeqCst) {
                    continue;
                }
                let link = tokio::spawn(async move {
                    if let Ok(mut outbound) = TcpStream::connect(upstream).await {
                        let _ = tokio::io::copy_bidirectional(&mut inbound, &mut outbound).await;
                    }
                });
                accepted.lock().unwrap().push(link);
            }
        });

        Self { addr, open, links }
    }

    /// Drop every open connection and refuse new ones.
    fn cut(&self) {
        self.open.store(false, Ordering::SeqCst);
        for link in self.links.lock().unwrap().drain(..) {
            link.abort();
        }
    }

    fn restore(&self) {
        self.open.store(true, Ordering::SeqCst);
    }
}

async fn field(handle: &SessionHandle, row_id: RowId, name: &str) -> Option<Value> {
    handle
        .row(row_id)
        .await
        .unwrap()
        .and_then(|row| row.get(name).cloned())
}

async fn wait_for_field(handle: &SessionHandle, row_id: RowId, name: &str, expected: &str) {
    for _ in 0..200 {
        if field(handle, row_id, name).await == Some(Value::from(expected)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "row {} {} never became {:?}, last {:?}",
        row_id,
        name,
        expected,
        field(handle, row_id, name).await
    );
}

// === Convergence ===

#[tokio::test]
async fn test_edit_on_a_converges_on_both_processes() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(20)).unwrap());
    let relay: Arc<dyn Relay> = Arc::new(MemoryRelay::new());
    let a = spawn_process("a", Arc::clone(&store), Arc::clone(&relay)).await;
    let b = spawn_process("b", Arc::clone(&store), relay).await;

    let on_a = connect(a).await;
    let on_b = connect(b).await;
    let (grid_a, grid_b) = (on_a.handle(), on_b.handle());

    let ticket = grid_a.edit(7, "priority", "High").await.unwrap();
    assert!(ticket.is_some());
    // Visible on A immediately, before any round trip completes.
    assert_eq!(field(&grid_a, 7, "priority").await, Some(Value::from("High")));

    wait_for_field(&grid_b, 7, "priority", "High").await;
    wait_for_field(&grid_a, 7, "priority", "High").await;

    let canonical = store.get_row(7).unwrap().unwrap();
    for _ in 0..200 {
        if grid_a.pending_edits().await.unwrap() == 0
            && grid_a.row(7).await.unwrap().as_ref() == Some(&canonical)
            && grid_b.row(7).await.unwrap().as_ref() == Some(&canonical)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(grid_a.row(7).await.unwrap(), Some(canonical.clone()));
    assert_eq!(grid_b.row(7).await.unwrap(), Some(canonical));

    on_a.shutdown().await;
    on_b.shutdown().await;
}

#[tokio::test]
async fn test_observers_see_remote_changes() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(5)).unwrap());
    let addr = spawn_process("a", Arc::clone(&store), Arc::new(MemoryRelay::new())).await;

    let editor = connect(addr).await;
    let viewer = connect(addr).await;
    let mut changes = viewer.handle().changes().unwrap();

    editor.handle().edit(3, "status", "Pending").await.unwrap();

    let change = tokio::time::timeout(Duration::from_secs(2), changes.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(change, CacheChange::Replaced { row_id: 3, index: 2 });
}

// === Failure handling ===

#[tokio::test]
async fn test_rejected_edit_rolls_back_with_notice() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(50)).unwrap());
    let addr = spawn_process("a", Arc::clone(&store), Arc::new(MemoryRelay::new())).await;

    let mut session = connect(addr).await;
    let grid = session.handle();
    // Row 42 disappears behind the client's back.
    store.delete_row(42).unwrap();

    grid.edit(42, "status", "Blocked").await.unwrap();

    let notice = tokio::time::timeout(Duration::from_secs(2), session.next_notice())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notice.row_id, 42);
    assert_eq!(notice.field, "status");
    assert!(!notice.message.is_empty());
    assert_eq!(field(&grid, 42, "status").await, Some(Value::from("Active")));
    assert_eq!(grid.pending_edits().await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalid_edit_is_rejected_locally() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(3)).unwrap());
    let addr = spawn_process("a", store, Arc::new(MemoryRelay::new())).await;
    let session = connect(addr).await;
    let grid = session.handle();

    let err = grid.edit(1, "priority", "Urgent").await.unwrap_err();
    assert!(matches!(
        err,
        ClientError::Validation(ValidationError::NotInEnum { .. })
    ));
    assert!(matches!(
        grid.edit(99, "priority", "High").await,
        Err(ClientError::Validation(ValidationError::UnknownRow(99)))
    ));
    // Same value again is a no-op.
    assert_eq!(grid.edit(1, "priority", "Low").await.unwrap(), None);
    assert_eq!(grid.pending_edits().await.unwrap(), 0);
}

// === Recovery ===

#[tokio::test]
async fn test_resync_rereads_rows() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(5)).unwrap());
    let addr = spawn_process("a", Arc::clone(&store), Arc::new(MemoryRelay::new())).await;
    let session = connect(addr).await;
    let grid = session.handle();

    // A write that never went through the broadcaster.
    let mut changes = FieldChanges::new();
    changes.insert("status".into(), "Archived".into());
    store.patch_row(2, &changes).unwrap();
    assert_eq!(field(&grid, 2, "status").await, Some(Value::from("Active")));

    grid.resync().unwrap();
    wait_for_field(&grid, 2, "status", "Archived").await;
}

#[tokio::test]
async fn test_push_channel_is_live_once_connected() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(5)).unwrap());
    let addr = spawn_process("a", Arc::clone(&store), Arc::new(MemoryRelay::new())).await;
    let config = config_for(addr);

    let session = connect(addr).await;
    let api = HttpRowApi::new(&config.client).unwrap();
    assert_eq!(api.health().await.unwrap().subscribers, 1);

    // Committed right after connect returns, with no settling delay.
    let mut changes = FieldChanges::new();
    changes.insert("status".into(), "Blocked".into());
    api.patch_row(4, &changes).await.unwrap();

    wait_for_field(&session.handle(), 4, "status", "Blocked").await;
}

#[tokio::test]
async fn test_reconnect_rehydrates_changes_missed_while_disconnected() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(10)).unwrap());
    let addr = spawn_process("a", Arc::clone(&store), Arc::new(MemoryRelay::new())).await;
    let tunnel = Tunnel::start(addr).await;

    let session = connect(tunnel.addr).await;
    let grid = session.handle();
    tunnel.cut();

    // Committed on the server while the client is cut off.
    let direct = HttpRowApi::new(&config_for(addr).client).unwrap();
    let mut changes = FieldChanges::new();
    changes.insert("status".into(), "Archived".into());
    let canonical = direct.patch_row(6, &changes).await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(field(&grid, 6, "status").await, Some(Value::from("Active")));

    tunnel.restore();
    wait_for_field(&grid, 6, "status", "Archived").await;
    assert_eq!(grid.row(6).await.unwrap(), Some(canonical));

    // The restored push channel carries later changes again.
    changes.insert("status".into(), "Pending".into());
    direct.patch_row(6, &changes).await.unwrap();
    wait_for_field(&grid, 6, "status", "Pending").await;
}

// === Windowing ===

#[tokio::test]
async fn test_visible_rows_follow_the_projector() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), seed(5_000)).unwrap());
    let addr = spawn_process("a", store, Arc::new(MemoryRelay::new())).await;
    let session = connect(addr).await;
    let grid = session.handle();

    let visible = grid.visible_rows(32_000.0, 960.0).await.unwrap();
    assert_eq!(visible.window.visible_start, 1_000);
    assert_eq!(visible.window.visible_end, 1_030);
    assert_eq!(visible.window.range(), 980..1_050);
    assert_eq!(visible.rows.len(), 70);
    assert_eq!(visible.rows[0].id, 981);

    let correction = grid.measure(10, 48.0).await.unwrap();
    assert_eq!(correction, 16.0);
}
