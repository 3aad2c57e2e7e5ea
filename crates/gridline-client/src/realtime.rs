//! WebSocket subscription to the server's push channel.

use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use gridline_core::ServerMessage;

use crate::error::Result;

/// An open push channel yielding decoded server messages.
pub struct PushStream {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl std::fmt::Debug for PushStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushStream").finish_non_exhaustive()
    }
}

impl PushStream {
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        tracing::info!("Connected to push channel {}", url);
        Ok(Self { socket })
    }

    /// Next message, or `None` once the server closes the channel.
    pub async fn next_message(&mut self) -> Option<Result<ServerMessage>> {
        while let Some(frame) = self.socket.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return Some(serde_json::from_str(text.as_str()).map_err(Into::into));
                }
                Ok(Message::Close(_)) => return None,
                // Pings are answered by the socket itself.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}
