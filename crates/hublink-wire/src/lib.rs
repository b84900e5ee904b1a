//! HubLink wire engine — symmetric RPC over a single WebSocket.
//!
//! A [`HubNode`] keeps one persistent connection to a hub and uses it in
//! both directions: it sends path-addressed requests and awaits their
//! correlated responses, and it answers requests the hub routes to it.
//!
//! ## Architecture
//!
//! - **message**: JSON envelopes, one per text frame
//! - **correlation**: id allocation and the response table
//! - **supervisor**: connect / read / reconnect loop with linear backoff
//! - **node**: the public engine handle and the request sender
//! - **registry**: locally served paths (unary and streaming) and dispatch
//! - **advertise**: the capability update sent on every (re)connection
//! - **transport**: the socket seam, with WebSocket and in-memory backends

pub mod advertise;
pub mod cancel;
pub mod correlation;
pub mod date;
pub mod error;
pub mod message;
pub mod node;
pub mod registry;
pub mod supervisor;
pub mod transport;

pub use advertise::{Capabilities, ServiceEntry, UPDATE_PATH, UPDATE_REPLY_TIMEOUT};
pub use cancel::CancelToken;
pub use error::{WireError, WireResult};
pub use message::{Inbound, Outcome, Request, Response};
pub use node::HubNode;
pub use registry::{ResourceHeader, ResourceKind, ServiceGroup, ServiceRegistry, StreamEmitter};
pub use supervisor::{Backoff, Connection, ConnectionState};
pub use transport::{MemoryListener, MemoryPeer, MemoryTransport, Transport, WebSocketTransport};
