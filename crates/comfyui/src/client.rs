//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for one
//! ComfyUI server plus the client ID this worker process registers
//! under. The ID is generated once at construction and reused by
//! every job the process handles, so ComfyUI sees a single client
//! identity for the whole worker lifetime.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The WebSocket stream type used for ComfyUI connections.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance.
///
/// Stores the WebSocket and HTTP API URLs plus the process-wide
/// client ID. Create a [`ComfyUIConnection`] by calling
/// [`connect`](Self::connect).
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// Create a new client for a ComfyUI instance, generating the
    /// process-wide client ID (UUID v4).
    ///
    /// * `ws_url`  - WebSocket base URL, e.g. `ws://host:8188`.
    /// * `api_url` - HTTP base URL, e.g. `http://host:8188`.
    pub fn new(ws_url: String, api_url: String) -> Self {
        Self {
            ws_url,
            api_url,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// The client ID sent during the WebSocket handshake and with
    /// every workflow submission.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// The client ID is appended as a query parameter so that ComfyUI
    /// addresses execution messages back to this worker.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection { ws_stream })
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Failed to establish the initial WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an already-established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
