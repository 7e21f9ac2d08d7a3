//! WebSocket client for the job event stream.
//!
//! [`StreamClient`] holds the connection configuration. Call
//! [`StreamClient::connect`] to establish a live [`StreamConnection`].
//! The bearer credential travels as a query parameter because the
//! browser-compatible WebSocket handshake cannot carry custom headers.

use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream};

use crate::error::TransportError;

/// Path of the event stream endpoint below the WebSocket base URL.
const STREAM_PATH: &str = "/ws/jobs";

/// Raw WebSocket stream type used by the channel.
pub type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the event stream endpoint.
pub struct StreamClient {
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to the event stream.
pub struct StreamConnection {
    /// Session identifier sent during the handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: WsStream,
}

impl StreamClient {
    /// Create a client for the given WebSocket base URL, e.g.
    /// `wss://host`. A client id (UUID v4) is generated once and reused
    /// across reconnects so the backend can recognise the session.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Build the full endpoint URL for `token`.
    pub fn endpoint(&self, token: &str) -> Result<reqwest::Url, TransportError> {
        reqwest::Url::parse_with_params(
            &format!("{}{STREAM_PATH}", self.ws_url),
            &[("token", token), ("client_id", self.client_id.as_str())],
        )
        .map_err(|e| TransportError::Network(format!("Invalid stream URL {}: {e}", self.ws_url)))
    }

    /// Connect to the event stream.
    ///
    /// A handshake rejected with 401/403 maps to [`TransportError::Auth`];
    /// every other failure maps to [`TransportError::Network`].
    pub async fn connect(&self, token: &str) -> Result<StreamConnection, TransportError> {
        let url = self.endpoint(token)?;

        let (ws_stream, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| self.classify(e))?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to event stream at {}",
            self.ws_url,
        );

        Ok(StreamConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }

    fn classify(&self, err: tungstenite::Error) -> TransportError {
        match err {
            tungstenite::Error::Http(response) => {
                let status = response.status().as_u16();
                let body = response
                    .body()
                    .as_deref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                match TransportError::from_status(status, body) {
                    auth @ TransportError::Auth(_) => auth,
                    other => TransportError::Network(format!(
                        "Event stream handshake at {} failed: {other}",
                        self.ws_url
                    )),
                }
            }
            other => TransportError::Network(format!(
                "Failed to connect to event stream at {}: {other}",
                self.ws_url
            )),
        }
    }
}
