//! Server integration tests over real sockets

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gridline_core::{
    Broadcaster, MemoryRelay, MemoryRowStore, Relay, Row, RowStore, Schema, ServerConfig,
    ServerMessage,
};
use gridline_server::{serve_on, AppState};
use tokio_tungstenite::tungstenite::Message;

fn rows() -> Vec<Row> {
    (1..=10)
        .map(|id| {
            Row::new(id)
                .with_field("status", "Active")
                .with_field("priority", "Low")
        })
        .collect()
}

async fn spawn_process(
    process_id: &str,
    store: Arc<dyn RowStore>,
    relay: Arc<dyn Relay>,
) -> SocketAddr {
    let broadcaster = Broadcaster::start(process_id, relay, 64).unwrap();
    let state = Arc::new(AppState::new(store, broadcaster));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve_on(listener, state));
    addr
}

async fn next_message<S>(ws: &mut S) -> ServerMessage
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for push")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn subscribers(base: &str) -> u64 {
    let health: serde_json::Value = reqwest::get(base).await.unwrap().json().await.unwrap();
    health["subscribers"].as_u64().unwrap()
}

// === Fan-out ===

#[tokio::test]
async fn test_patch_on_a_is_pushed_to_client_on_b() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), rows()).unwrap());
    let relay: Arc<dyn Relay> = Arc::new(MemoryRelay::new());
    let a = spawn_process("a", Arc::clone(&store), Arc::clone(&relay)).await;
    let b = spawn_process("b", Arc::clone(&store), relay).await;

    let (mut ws_b, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", b))
        .await
        .unwrap();
    // Subscribed as soon as the handshake completes.
    assert_eq!(subscribers(&format!("http://{}/", b)).await, 1);

    let response = reqwest::Client::new()
        .patch(format!("http://{}/rows/7", a))
        .json(&serde_json::json!({"priority": "High"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let canonical: Row = response.json().await.unwrap();

    assert_eq!(next_message(&mut ws_b).await, ServerMessage::RowUpdate { row: canonical });
}

#[tokio::test]
async fn test_list_rows_and_errors() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), rows()).unwrap());
    let addr = spawn_process("a", store, Arc::new(MemoryRelay::new())).await;
    let client = reqwest::Client::new();

    let listed: Vec<Row> = client
        .get(format!("http://{}/rows", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), (1..=10).collect::<Vec<_>>());

    let response = client
        .patch(format!("http://{}/rows/99", addr))
        .json(&serde_json::json!({"status": "Blocked"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Row not found");
}

#[tokio::test]
async fn test_sequential_patches_arrive_in_commit_order() {
    let store: Arc<dyn RowStore> =
        Arc::new(MemoryRowStore::with_rows(Schema::tracker(), rows()).unwrap());
    let addr = spawn_process("a", store, Arc::new(MemoryRelay::new())).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    assert_eq!(subscribers(&format!("http://{}/", addr)).await, 1);

    let client = reqwest::Client::new();
    for status in ["Pending", "Blocked", "Archived"] {
        client
            .patch(format!("http://{}/rows/3", addr))
            .json(&serde_json::json!({ "status": status }))
            .send()
            .await
            .unwrap();
    }

    let mut versions = Vec::new();
    for _ in 0..3 {
        match next_message(&mut ws).await {
            ServerMessage::RowUpdate { row } => versions.push(row.version),
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(versions, vec![1, 2, 3]);
}

// === Configuration ===

#[tokio::test]
async fn test_state_from_config_opens_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig {
        database_path: Some(dir.path().join("rows.db").display().to_string()),
        process_id: "configured".into(),
        ..ServerConfig::default()
    };

    let state = AppState::from_config(&config, Arc::new(MemoryRelay::new())).unwrap();
    state.store.insert_rows(rows()).unwrap();
    assert_eq!(state.store.count().unwrap(), 10);
    assert_eq!(state.broadcaster.process_id(), "configured");
}
