//! Errors from the wire engine.
//!
//! Transport variants never reach callers of [`crate::HubNode::send`]; the
//! supervisor absorbs them and reconnects. Callers only see [`WireError::Remote`],
//! [`WireError::Decode`], [`WireError::Encode`], [`WireError::Cancelled`] and
//! [`WireError::Shutdown`].

use hublink_types::CredentialError;
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),
    /// The outbound value could not be serialized.
    #[error("Encode error: {0}")]
    Encode(serde_json::Error),
    /// An inbound frame matched no known envelope shape.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
    /// The peer answered with an `error` outcome.
    #[error("Remote error: {0}")]
    Remote(String),
    /// The response body did not match the caller's expected type.
    #[error("Decode error: {0}")]
    Decode(serde_json::Error),
    /// The caller cancelled before the request was written.
    #[error("Request cancelled")]
    Cancelled,
    /// The node was shut down.
    #[error("Node shut down")]
    Shutdown,
}

impl WireError {
    /// The peer-supplied message of a remote error.
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            WireError::Remote(message) => Some(message),
            _ => None,
        }
    }
}

/// Alias for wire results.
pub type WireResult<T> = Result<T, WireError>;
