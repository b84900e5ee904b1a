//! The engine handle and the request sender.
//!
//! A [`HubNode`] owns one supervisor task and the state it shares with
//! callers. Sending a request allocates an id, writes the frame on whatever
//! connection is live (waiting for one if needed, and retrying on a fresh
//! connection if the write fails), then waits for the correlated response.
//!
//! Cancellation covers the acquire-and-write phase only. Once written, a
//! request waits for its response with no timeout, across reconnects if it
//! has to. Dropping the returned future is the only way to stop waiting;
//! the table entry then stays until a response for that id arrives.

use crate::advertise::Capabilities;
use crate::cancel::{cancelled_opt, CancelToken};
use crate::correlation::{MessageIds, ResponseTable};
use crate::error::{WireError, WireResult};
use crate::message::encode_request;
use crate::registry::ServiceRegistry;
use crate::supervisor::{self, Connection, ConnectionState};
use crate::transport::{Transport, WebSocketTransport};
use hublink_types::{HubConfig, KeyChain, ReconnectConfig};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// State shared between the node handle and its supervisor task.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) ids: MessageIds,
    pub(crate) responses: ResponseTable,
    pub(crate) registry: RwLock<ServiceRegistry>,
    pub(crate) reconnect: ReconnectConfig,
    pub(crate) shutdown: CancelToken,
}

/// A running peer: one persistent connection used in both directions.
pub struct HubNode {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HubNode {
    /// Start a node on `transport`. Must be called inside a Tokio runtime.
    pub fn start(
        config: &HubConfig,
        registry: ServiceRegistry,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            transport,
            state,
            ids: MessageIds::default(),
            responses: ResponseTable::new(),
            registry: RwLock::new(registry),
            reconnect: config.reconnect.clone(),
            shutdown: CancelToken::new(),
        });

        let task = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::select! {
                    _ = supervisor::run(Arc::clone(&shared)) => {}
                    _ = shared.shutdown.cancelled() => {}
                }
                shared.state.send_replace(ConnectionState::Disconnected);
                debug!("Supervisor stopped");
            })
        };

        info!(endpoint = %shared.transport.endpoint(), "Hub node started");
        Self {
            shared,
            task: Mutex::new(Some(task)),
        }
    }

    /// Start a node on the WebSocket endpoint from `config`, signing each
    /// connection with the local key chain when auth is enabled.
    pub fn connect(config: &HubConfig, registry: ServiceRegistry) -> WireResult<Self> {
        let mut transport = WebSocketTransport::new(config.url());
        if config.auth.enabled {
            let keys = KeyChain::load_or_create(&config.auth.key_path())?;
            info!(public_key = %keys.public_key(), "Authenticating with local key");
            transport = transport.with_credentials(Arc::new(keys));
        }
        Ok(Self::start(config, registry, Arc::new(transport)))
    }

    /// Send a request to `path` and decode the response body as `O`.
    ///
    /// Pass `None::<&()>` for a bodiless request and `()` as `O` to ignore
    /// the output.
    pub async fn send<I, O>(&self, path: &str, body: Option<&I>) -> WireResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.send_inner(path, body, None).await
    }

    /// [`send`](Self::send) that gives up with [`WireError::Cancelled`] if
    /// `cancel` fires before the request is written.
    pub async fn send_with_cancel<I, O>(
        &self,
        path: &str,
        body: Option<&I>,
        cancel: &CancelToken,
    ) -> WireResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        self.send_inner(path, body, Some(cancel)).await
    }

    /// Bodiless request.
    pub async fn request<O: DeserializeOwned>(&self, path: &str) -> WireResult<O> {
        self.send::<(), O>(path, None).await
    }

    /// Request whose output is ignored.
    pub async fn post<I: Serialize + ?Sized>(&self, path: &str, body: &I) -> WireResult<()> {
        self.send::<I, serde_json::Value>(path, Some(body))
            .await
            .map(|_| ())
    }

    async fn send_inner<I, O>(
        &self,
        path: &str,
        body: Option<&I>,
        cancel: Option<&CancelToken>,
    ) -> WireResult<O>
    where
        I: Serialize + ?Sized,
        O: DeserializeOwned,
    {
        let id = self.shared.ids.next();
        let frame = encode_request(id, path, body)?;

        // A failed write breaks its connection; wait for the one that replaces it.
        let mut failed_epoch = 0;
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(WireError::Cancelled);
            }
            let connection = tokio::select! {
                connection = self.connection_after(failed_epoch) => connection?,
                _ = cancelled_opt(cancel) => return Err(WireError::Cancelled),
            };

            match connection.send_text(frame.clone()).await {
                Ok(()) => break,
                Err(e) => {
                    debug!(id, path, epoch = connection.epoch(), error = %e, "Write failed, retrying");
                    failed_epoch = connection.epoch();
                }
            }
        }

        let response = tokio::select! {
            response = self.shared.responses.wait(id) => response?,
            _ = self.shared.shutdown.cancelled() => return Err(WireError::Shutdown),
        };
        response.into_body()
    }

    /// The live connection, waiting until there is one.
    pub async fn connection(&self) -> WireResult<Connection> {
        self.connection_after(0).await
    }

    async fn connection_after(&self, epoch: u64) -> WireResult<Connection> {
        let mut rx = self.shared.state.subscribe();
        tokio::select! {
            state = rx.wait_for(|s| s.connection().is_some_and(|c| c.epoch() > epoch)) => {
                match state.map_err(|_| WireError::Shutdown)?.connection() {
                    Some(connection) => Ok(connection.clone()),
                    None => Err(WireError::Shutdown),
                }
            }
            _ = self.shared.shutdown.cancelled() => Err(WireError::Shutdown),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Subscribe to connection state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Switch a service group on or off. Takes effect for dispatch at once
    /// and for advertisement on the next connect. Returns `false` for an
    /// unknown group.
    pub fn set_group_enabled(&self, name: &str, enabled: bool) -> bool {
        self.shared
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .set_group_enabled(name, enabled)
    }

    /// What the next advertisement would contain.
    pub fn capabilities(&self) -> Capabilities {
        let registry = self.shared.registry.read().unwrap_or_else(|e| e.into_inner());
        Capabilities::from_registry(&registry)
    }

    /// Number of requests still waiting for a response, plus parked
    /// responses nobody has claimed yet.
    pub fn pending(&self) -> usize {
        self.shared.responses.len()
    }

    /// Stop the supervisor and fail every pending call with
    /// [`WireError::Shutdown`].
    pub fn shutdown(&self) {
        if self.shared.shutdown.is_cancelled() {
            return;
        }
        self.shared.shutdown.cancel();
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
        }
        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!("Hub node shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }
}

impl Drop for HubNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use serde_json::{json, Value};
    use std::time::Duration;

    fn fast_config() -> HubConfig {
        let mut config = HubConfig::default();
        config.reconnect.unit_ms = 10;
        config
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let (transport, mut listener) = MemoryTransport::pair();
        let node = HubNode::start(&fast_config(), ServiceRegistry::new(), Arc::new(transport));

        let hub = tokio::spawn(async move {
            let mut peer = listener.accept().await.unwrap();
            let frame = peer.recv_json().await.unwrap();
            assert_eq!(frame, json!({"id": 1, "path": "status"}));
            peer.send_json(&json!({"id": 1, "body": {"ok": true}}));
            peer
        });

        let status: Value = node.request("status").await.unwrap();
        assert_eq!(status, json!({"ok": true}));
        assert!(node.state().is_connected());
        assert_eq!(node.pending(), 0);
        drop(hub.await.unwrap());
    }

    #[tokio::test]
    async fn test_post_ignores_output() {
        let (transport, mut listener) = MemoryTransport::pair();
        let node = HubNode::start(&fast_config(), ServiceRegistry::new(), Arc::new(transport));

        let hub = tokio::spawn(async move {
            let mut peer = listener.accept().await.unwrap();
            let frame = peer.recv_json().await.unwrap();
            assert_eq!(frame["body"], json!([1, 2, 3]));
            peer.send_json(&json!({"id": frame["id"], "body": "ignored"}));
            peer
        });

        node.post("store", &[1, 2, 3]).await.unwrap();
        drop(hub.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_while_disconnected() {
        let (transport, _listener) = MemoryTransport::pair();
        transport.refuse_next(u32::MAX);
        let node = HubNode::start(&fast_config(), ServiceRegistry::new(), Arc::new(transport));

        let cancel = CancelToken::new();
        let call = node.send_with_cancel::<(), Value>("status", None, &cancel);
        let canceller = {
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                cancel.cancel();
            }
        };
        let (result, ()) = tokio::join!(call, canceller);
        assert!(matches!(result, Err(WireError::Cancelled)));
    }

    #[tokio::test]
    async fn test_shutdown_fails_pending_calls() {
        let (transport, _listener) = MemoryTransport::pair();
        transport.refuse_next(u32::MAX);
        let node = HubNode::start(&fast_config(), ServiceRegistry::new(), Arc::new(transport));

        let call = node.request::<Value>("status");
        let stopper = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            node.shutdown();
        };
        let (result, ()) = tokio::join!(call, stopper);
        assert!(matches!(result, Err(WireError::Shutdown)));
        assert!(node.is_shut_down());
        assert!(!node.state().is_connected());
    }

    #[tokio::test]
    async fn test_group_toggle_through_node() {
        let (transport, _listener) = MemoryTransport::pair();
        let registry = ServiceRegistry::new().group(
            crate::registry::ServiceGroup::new("admin")
                .unary("admin/ping", |_: ()| async move { Ok("pong") }),
        );
        let node = HubNode::start(&fast_config(), registry, Arc::new(transport));

        assert_eq!(node.capabilities().services.len(), 1);
        assert!(node.set_group_enabled("admin", false));
        assert!(node.capabilities().is_empty());
        assert!(!node.set_group_enabled("missing", false));
    }
}
