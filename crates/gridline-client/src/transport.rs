//! HTTP transport to the row store API.

use std::time::Duration;

use reqwest::{Client, Response};

use gridline_core::{
    ClientConfig, ErrorBody, FieldChanges, HealthStatus, Row, RowId, UpdateFailure,
};

use crate::error::{ClientError, Result};

/// Thin client for `GET /`, `GET /rows` and `PATCH /rows/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRowApi {
    client: Client,
    base_url: String,
}

impl HttpRowApi {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of the WebSocket push channel.
    pub fn ws_url(&self) -> String {
        let rest = self
            .base_url
            .strip_prefix("https://")
            .map(|rest| format!("wss://{}", rest))
            .or_else(|| {
                self.base_url
                    .strip_prefix("http://")
                    .map(|rest| format!("ws://{}", rest))
            })
            .unwrap_or_else(|| self.base_url.clone());
        format!("{}/ws", rest)
    }

    pub async fn health(&self) -> Result<HealthStatus> {
        let response = self.client.get(format!("{}/", self.base_url)).send().await?;
        Ok(ok_or_status(response).await?.json().await?)
    }

    /// Bulk read of every row, ascending by id.
    pub async fn list_rows(&self) -> Result<Vec<Row>> {
        let response = self
            .client
            .get(format!("{}/rows", self.base_url))
            .send()
            .await?;
        Ok(ok_or_status(response).await?.json().await?)
    }

    /// Send one durable update and classify the outcome for the coordinator.
    pub async fn patch_row(
        &self,
        row_id: RowId,
        changes: &FieldChanges,
    ) -> std::result::Result<Row, UpdateFailure> {
        let response = self
            .client
            .patch(format!("{}/rows/{}", self.base_url, row_id))
            .json(changes)
            .send()
            .await
            .map_err(|e| UpdateFailure::Transport(e.to_string()))?;

        match ok_or_status(response).await {
            Ok(response) => response
                .json()
                .await
                .map_err(|e| UpdateFailure::Transport(e.to_string())),
            Err(ClientError::Status { status: 404, .. }) => Err(UpdateFailure::NotFound),
            Err(ClientError::Status { message, .. }) => Err(UpdateFailure::Rejected(message)),
            Err(other) => Err(UpdateFailure::Transport(other.to_string())),
        }
    }
}

/// Pass successful responses through; turn the rest into `ClientError::Status`
/// carrying the server's `{"message"}` when present.
async fn ok_or_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.message)
        .unwrap_or_else(|_| {
            if text.is_empty() {
                status.canonical_reason().unwrap_or("Request failed").to_string()
            } else {
                text
            }
        });
    Err(ClientError::Status {
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base_url: &str) -> HttpRowApi {
        HttpRowApi::new(&ClientConfig {
            base_url: base_url.into(),
            ..ClientConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn ws_url_follows_scheme() {
        assert_eq!(api("http://127.0.0.1:4000").ws_url(), "ws://127.0.0.1:4000/ws");
        assert_eq!(api("https://grid.example.com/").ws_url(), "wss://grid.example.com/ws");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = api(&format!("http://{}", addr))
            .patch_row(1, &FieldChanges::new())
            .await;
        assert!(matches!(result, Err(UpdateFailure::Transport(_))));
    }
}
