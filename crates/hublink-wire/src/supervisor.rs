//! Connection supervisor — the connect / read / reconnect loop.
//!
//! The supervisor task is the only writer of the published
//! [`ConnectionState`]. Each pass sleeps for the current backoff, connects,
//! publishes the live [`Connection`], advertises local capabilities, and then
//! reads frames until the connection fails. Any failure clears the published
//! connection, bumps the failure counter and starts over; there is no
//! terminal state short of shutting the node down.
//!
//! A failed write marks its connection broken. The read loop watches for
//! that and ends the connection, so a writer that hit an error always gets a
//! fresh connection to retry on even when the read side is still open.
//!
//! Requests written on a connection that later drops stay in the response
//! table. Their callers keep waiting, and a response that arrives on a later
//! connection is still delivered.

use crate::advertise;
use crate::cancel::CancelToken;
use crate::error::WireError;
use crate::message::{decode_frame, encode_response, Inbound, Response};
use crate::node::Shared;
use crate::registry;
use crate::transport::{FrameSink, FrameStream};
use futures::{SinkExt, StreamExt};
use hublink_types::ReconnectConfig;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Longest frame excerpt included in diagnostics.
const FRAME_EXCERPT_LEN: usize = 200;

/// A live connection. Cheap to clone; all clones write through one lock so
/// frames from concurrent senders never interleave.
#[derive(Clone)]
pub struct Connection {
    epoch: u64,
    sink: Arc<Mutex<FrameSink>>,
    broken: CancelToken,
}

impl Connection {
    pub(crate) fn new(epoch: u64, sink: FrameSink) -> Self {
        Self {
            epoch,
            sink: Arc::new(Mutex::new(sink)),
            broken: CancelToken::new(),
        }
    }

    /// Sequence number of this connection, starting at 1 for the first.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Write one text frame.
    ///
    /// A failed write marks the connection broken; the supervisor then drops
    /// it and reconnects.
    pub async fn send_text(&self, text: String) -> Result<(), WireError> {
        let mut sink = self.sink.lock().await;
        let result = sink.send(text).await;
        if result.is_err() {
            self.broken.cancel();
        }
        result
    }

    /// Whether a write on this connection has failed.
    pub fn is_broken(&self) -> bool {
        self.broken.is_cancelled()
    }

    /// Resolve once a write on this connection fails.
    pub(crate) async fn broken(&self) {
        self.broken.cancelled().await
    }

    /// Encode and write one response frame.
    pub async fn send_response(&self, response: &Response) -> Result<(), WireError> {
        self.send_text(encode_response(response)?).await
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("epoch", &self.epoch)
            .field("broken", &self.is_broken())
            .finish_non_exhaustive()
    }
}

/// Lifecycle of the node's single connection.
#[derive(Debug, Clone, Default)]
pub enum ConnectionState {
    /// No connection and no attempt in progress.
    #[default]
    Disconnected,
    /// Connection attempt number `attempt` since the last success.
    Connecting { attempt: u32 },
    /// Connected; frames may be written.
    Connected(Connection),
}

impl ConnectionState {
    /// The live connection, if any.
    pub fn connection(&self) -> Option<&Connection> {
        match self {
            ConnectionState::Connected(connection) => Some(connection),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }
}

/// Linear reconnect backoff.
///
/// With `n` consecutive failures the next attempt waits `(n - 1) * unit`:
/// `0, 1, 2, 3, …` units, so the first retry is immediate. A success resets
/// the count. The optional cap bounds a single delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    unit: Duration,
    max: Option<Duration>,
}

impl Backoff {
    pub fn new(unit: Duration, max: Option<Duration>) -> Self {
        Self {
            failures: 0,
            unit,
            max,
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.unit(), config.max_delay())
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Delay before the next connection attempt.
    pub fn delay(&self) -> Duration {
        let delay = self.unit.saturating_mul(self.failures.saturating_sub(1));
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    pub fn failed(&mut self) {
        self.failures = self.failures.saturating_add(1);
    }

    pub fn succeeded(&mut self) {
        self.failures = 0;
    }
}

/// Run the supervisor until the task is dropped.
pub(crate) async fn run(shared: Arc<Shared>) {
    let mut backoff = Backoff::from_config(&shared.reconnect);
    let endpoint = shared.transport.endpoint();
    let mut epoch: u64 = 0;

    loop {
        let delay = backoff.delay();
        if !delay.is_zero() {
            debug!(failures = backoff.failures(), ?delay, "Waiting before reconnect");
            tokio::time::sleep(delay).await;
        }

        shared.state.send_replace(ConnectionState::Connecting {
            attempt: backoff.failures().saturating_add(1),
        });

        let (sink, stream) = match shared.transport.connect().await {
            Ok(halves) => halves,
            Err(e) => {
                backoff.failed();
                shared.state.send_replace(ConnectionState::Disconnected);
                warn!(
                    %endpoint,
                    error = %e,
                    failures = backoff.failures(),
                    "Connect failed"
                );
                continue;
            }
        };

        backoff.succeeded();
        epoch += 1;
        let connection = Connection::new(epoch, sink);
        shared
            .state
            .send_replace(ConnectionState::Connected(connection.clone()));
        info!(%endpoint, epoch, "Connected");

        advertise::advertise(&shared, &connection).await;

        let reason = read_loop(&shared, &connection, stream).await;
        shared.state.send_replace(ConnectionState::Disconnected);
        backoff.failed();
        warn!(%endpoint, epoch, reason = %reason, "Connection lost");
    }
}

/// Route inbound frames until the connection ends; returns why it ended.
async fn read_loop(shared: &Shared, connection: &Connection, mut stream: FrameStream) -> WireError {
    loop {
        let frame = tokio::select! {
            frame = stream.next() => frame,
            _ = connection.broken() => {
                return WireError::Transport("write failed".to_string());
            }
        };
        let text = match frame {
            Some(Ok(text)) => text,
            Some(Err(e)) => return e,
            None => return WireError::ConnectionClosed,
        };

        match decode_frame(&text) {
            Ok(Inbound::Response(response)) => shared.responses.deliver(response),
            Ok(Inbound::Request(request)) => {
                registry::dispatch(&shared.registry, connection, request)
            }
            Err(e) => debug!(
                error = %e,
                frame = %excerpt(&text),
                "Dropping malformed frame"
            ),
        }
    }
}

fn excerpt(text: &str) -> &str {
    match text.char_indices().nth(FRAME_EXCERPT_LEN) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}
