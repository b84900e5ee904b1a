//! WebSocket transport over `tokio-tungstenite`.

use super::{FrameSink, FrameStream, Transport};
use crate::error::WireError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hublink_types::Credentials;
use std::sync::Arc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

/// Request header carrying the signed node identity.
pub const AUTH_HEADER: &str = "Authorization";

/// Connects to a `ws://` or `wss://` endpoint, one text frame per envelope.
pub struct WebSocketTransport {
    url: String,
    credentials: Option<Arc<dyn Credentials>>,
}

impl WebSocketTransport {
    /// Transport for `url` without authentication.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            credentials: None,
        }
    }

    /// Sign every connection attempt with `credentials`.
    pub fn with_credentials(mut self, credentials: Arc<dyn Credentials>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Build the upgrade request, attaching a freshly signed auth header.
    fn client_request(&self) -> Result<Request, WireError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| WireError::InvalidEndpoint(format!("{}: {e}", self.url)))?;

        if let Some(credentials) = &self.credentials {
            let value = credentials.auth_header()?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| WireError::Transport(format!("invalid auth header: {e}")))?;
            request.headers_mut().insert(AUTH_HEADER, value);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), WireError> {
        let request = self.client_request()?;
        let (ws, _) = tokio_tungstenite::connect_async(request).await?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(WireError::from)
            .with(|text: String| async move { Ok::<_, WireError>(Message::Text(text.into())) });

        let stream = stream.filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by peer");
                    Some(Err(WireError::ConnectionClosed))
                }
                // Binary frames carry no envelopes; ping/pong is handled by tungstenite.
                Ok(_) => None,
                Err(e) => Some(Err(WireError::from(e))),
            }
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}
