//! The socket seam.
//!
//! The engine never touches a socket directly. A [`Transport`] opens one
//! duplex channel of text frames per call to [`Transport::connect`]; the
//! supervisor owns the returned halves until the channel fails.

mod memory;
mod websocket;

pub use memory::{MemoryListener, MemoryPeer, MemoryTransport};
pub use websocket::{WebSocketTransport, AUTH_HEADER};

use crate::error::WireError;
use async_trait::async_trait;
use futures::{Sink, Stream};
use std::pin::Pin;

/// Outbound half of a connection: accepts whole text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = WireError> + Send>>;

/// Inbound half of a connection: yields whole text frames until the
/// connection ends or fails.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, WireError>> + Send>>;

/// Opens connections to one fixed endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish a new connection.
    async fn connect(&self) -> Result<(FrameSink, FrameStream), WireError>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}
