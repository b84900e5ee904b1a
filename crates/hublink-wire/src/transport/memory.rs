//! In-process loopback transport.
//!
//! Each successful [`MemoryTransport::connect`] hands the far end of the new
//! channel to the paired [`MemoryListener`] as a [`MemoryPeer`]. Dropping the
//! peer closes the connection from the hub's side.

use super::{FrameSink, FrameStream, Transport};
use crate::error::WireError;
use async_trait::async_trait;
use futures::channel::mpsc as frames;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// Client side of an in-memory hub.
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refuse: AtomicU32,
    attempts: AtomicU32,
}

/// Hub side: yields one [`MemoryPeer`] per accepted connection.
pub struct MemoryListener {
    accepted: mpsc::UnboundedReceiver<MemoryPeer>,
}

/// The hub's end of one connection.
pub struct MemoryPeer {
    outgoing: frames::UnboundedSender<String>,
    incoming: frames::UnboundedReceiver<String>,
}

impl MemoryTransport {
    /// Create a connected transport/listener pair.
    pub fn pair() -> (Self, MemoryListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                accepted: tx,
                refuse: AtomicU32::new(0),
                attempts: AtomicU32::new(0),
            },
            MemoryListener { accepted: rx },
        )
    }

    /// Fail the next `count` connection attempts.
    pub fn refuse_next(&self, count: u32) {
        self.refuse.store(count, Ordering::SeqCst);
    }

    /// Total connection attempts so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), WireError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(WireError::Transport("connection refused".to_string()));
        }

        let (client_tx, peer_rx) = frames::unbounded::<String>();
        let (peer_tx, client_rx) = frames::unbounded::<String>();
        self.accepted
            .send(MemoryPeer {
                outgoing: peer_tx,
                incoming: peer_rx,
            })
            .map_err(|_| WireError::Transport("listener closed".to_string()))?;

        let sink = client_tx.sink_map_err(|e| WireError::Transport(e.to_string()));
        let stream = client_rx.map(Ok);
        Ok((Box::pin(sink), Box::pin(stream)))
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

impl MemoryListener {
    /// Wait for the next connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accepted.recv().await
    }
}

impl MemoryPeer {
    /// Next frame written by the node, or `None` once it hung up.
    pub async fn recv(&mut self) -> Option<String> {
        self.incoming.next().await
    }

    /// Next frame parsed as JSON. Frames that are not JSON yield `None`.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Push a frame to the node. Returns `false` if the node hung up.
    pub fn send(&self, text: impl Into<String>) -> bool {
        self.outgoing.unbounded_send(text.into()).is_ok()
    }

    /// Push a JSON value as one frame.
    pub fn send_json(&self, value: &Value) -> bool {
        self.send(value.to_string())
    }
}
