//! Integration tests for the HubNode request/response pipeline.
//!
//! Nodes run on the in-memory transport. Some tests drive the hub side by
//! hand through a `MemoryPeer`; others relay frames between two real nodes
//! so one node's requests are served by the other's registry.
//!
//! No sockets are opened; everything is in-process tokio tasks.

use async_trait::async_trait;
use futures::future::join_all;
use hublink_types::HubConfig;
use hublink_wire::transport::{FrameSink, FrameStream};
use hublink_wire::{
    ConnectionState, HubNode, MemoryListener, MemoryPeer, MemoryTransport, ServiceGroup,
    ServiceRegistry, StreamEmitter, Transport, WireError, UPDATE_PATH, UPDATE_REPLY_TIMEOUT,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn fast_config() -> HubConfig {
    let mut config = HubConfig::default();
    config.reconnect.unit_ms = 10;
    config
}

#[derive(Deserialize)]
struct Count {
    to: u32,
}

fn demo_registry() -> ServiceRegistry {
    ServiceRegistry::new()
        .unary("echo", |input: Value| async move { Ok(input) })
        .unary("fail", |_: Value| async move {
            Err::<Value, _>(anyhow::anyhow!("bad input"))
        })
        .stream("count", |input: Count, out: StreamEmitter| async move {
            for n in 1..=input.to {
                out.emit(&n)?;
            }
            Ok(())
        })
        .group(
            ServiceGroup::new("admin")
                .unary("admin/ping", |_: ()| async move { Ok("pong") })
                .disabled(),
        )
}

/// Start a node and return it with the hub end of its transport.
fn start(registry: ServiceRegistry) -> (HubNode, Arc<MemoryTransport>, MemoryListener) {
    let (transport, listener) = MemoryTransport::pair();
    let transport = Arc::new(transport);
    let node = HubNode::start(&fast_config(), registry, transport.clone());
    (node, transport, listener)
}

/// First connection accepts no writes but never closes its read side; later
/// connections go to the wrapped memory transport.
struct WriteFailsOnce {
    inner: Arc<MemoryTransport>,
    failed: AtomicBool,
}

#[async_trait]
impl Transport for WriteFailsOnce {
    async fn connect(&self) -> Result<(FrameSink, FrameStream), WireError> {
        if self.failed.swap(true, Ordering::SeqCst) {
            return self.inner.connect().await;
        }
        let sink: FrameSink = Box::pin(futures::sink::unfold((), |(), _frame: String| async {
            Err::<(), _>(WireError::Transport("write side gone".to_string()))
        }));
        let stream: FrameStream = Box::pin(futures::stream::pending());
        Ok((sink, stream))
    }

    fn endpoint(&self) -> String {
        "memory://write-fails-once".to_string()
    }
}

async fn accept(listener: &mut MemoryListener) -> MemoryPeer {
    tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("node should connect")
        .expect("listener open")
}

async fn recv(peer: &mut MemoryPeer) -> Value {
    tokio::time::timeout(WAIT, peer.recv_json())
        .await
        .expect("frame expected")
        .expect("peer open")
}

/// Forward every frame between two hub-side peers until either hangs up.
async fn relay(mut a: MemoryPeer, mut b: MemoryPeer) {
    loop {
        tokio::select! {
            frame = a.recv() => {
                let Some(frame) = frame else { break };
                if !b.send(frame) {
                    break;
                }
            }
            frame = b.recv() => {
                let Some(frame) = frame else { break };
                if !a.send(frame) {
                    break;
                }
            }
        }
    }
}

/// Two nodes wired to each other: `client` has no handlers, `server` runs
/// the demo registry.
async fn linked_pair() -> (HubNode, HubNode) {
    let (client, _, mut client_listener) = start(ServiceRegistry::new());
    let (server, _, mut server_listener) = start(demo_registry());
    let a = accept(&mut client_listener).await;
    let b = accept(&mut server_listener).await;
    tokio::spawn(relay(a, b));
    (client, server)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_echo_between_nodes() {
    let (client, _server) = linked_pair().await;

    let reply: Value = tokio::time::timeout(WAIT, client.send("echo", Some(&json!({"msg": "hi"}))))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, json!({"msg": "hi"}));
}

#[tokio::test]
async fn test_remote_failure_surfaces_message() {
    let (client, _server) = linked_pair().await;

    let err = tokio::time::timeout(WAIT, client.request::<Value>("fail"))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.remote_message(), Some("bad input"));
}

#[tokio::test]
async fn test_decode_error_is_local() {
    let (client, _server) = linked_pair().await;

    let err = tokio::time::timeout(WAIT, client.send::<_, u32>("echo", Some("text")))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, WireError::Decode(_)));
}

#[tokio::test]
async fn test_concurrent_sends_pair_exactly() {
    let (client, _server) = linked_pair().await;

    let calls = (0..50).map(|n| {
        let client = &client;
        async move {
            let reply: Value = client.send("echo", Some(&json!({ "n": n }))).await?;
            Ok::<_, WireError>((n, reply))
        }
    });
    let results = tokio::time::timeout(WAIT, join_all(calls)).await.unwrap();

    for result in results {
        let (n, reply) = result.unwrap();
        assert_eq!(reply, json!({ "n": n }));
    }
    assert_eq!(client.pending(), 0);
}

#[tokio::test]
async fn test_unknown_path_between_nodes() {
    let (client, _server) = linked_pair().await;

    let err = tokio::time::timeout(WAIT, client.request::<Value>("missing"))
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(err.remote_message(), Some("unknown path"));
}

#[tokio::test]
async fn test_late_response_after_reconnect() {
    let (node, transport, mut listener) = start(ServiceRegistry::new());
    let node = Arc::new(node);
    let mut peer = accept(&mut listener).await;

    // Ids 1..=6 complete normally.
    for expected in 1..=6u64 {
        let call = {
            let node = node.clone();
            tokio::spawn(async move { node.request::<Value>("tick").await })
        };
        let frame = recv(&mut peer).await;
        assert_eq!(frame["id"], expected);
        peer.send_json(&json!({"id": expected, "body": expected}));
        assert_eq!(call.await.unwrap().unwrap(), json!(expected));
    }

    // Id 7 is written, then the connection drops before the answer.
    let call = {
        let node = node.clone();
        tokio::spawn(async move { node.request::<String>("slow").await })
    };
    let frame = recv(&mut peer).await;
    assert_eq!(frame, json!({"id": 7, "path": "slow"}));
    drop(peer);

    let peer = accept(&mut listener).await;
    assert_eq!(transport.attempts(), 2);
    assert!(!call.is_finished());
    assert_eq!(node.pending(), 1);

    peer.send_json(&json!({"id": 7, "body": "late"}));
    let reply = tokio::time::timeout(WAIT, call).await.unwrap().unwrap();
    assert_eq!(reply.unwrap(), "late");
    assert_eq!(node.pending(), 0);
}

#[tokio::test]
async fn test_advertisement_and_disabled_group() {
    let (node, _, mut listener) = start(demo_registry());
    let mut peer = accept(&mut listener).await;

    let update = recv(&mut peer).await;
    assert_eq!(update["path"], UPDATE_PATH);
    assert_eq!(
        update["body"],
        json!({
            "services": [{"path": "count"}, {"path": "echo"}, {"path": "fail"}],
            "apps": []
        })
    );
    peer.send_json(&json!({"id": update["id"]}));

    peer.send_json(&json!({"id": 100, "path": "admin/ping"}));
    assert_eq!(
        recv(&mut peer).await,
        json!({"id": 100, "error": "unknown path"})
    );

    assert!(node.set_group_enabled("admin", true));
    peer.send_json(&json!({"id": 101, "path": "admin/ping"}));
    assert_eq!(recv(&mut peer).await, json!({"id": 101, "body": "pong"}));

    // The next connection advertises the re-enabled group.
    drop(peer);
    let mut peer = accept(&mut listener).await;
    let update = recv(&mut peer).await;
    assert_eq!(update["path"], UPDATE_PATH);
    assert!(update["body"]["services"]
        .as_array()
        .unwrap()
        .contains(&json!({"path": "admin/ping"})));
}

#[tokio::test]
async fn test_nothing_advertised_for_empty_registry() {
    let (node, _, mut listener) = start(ServiceRegistry::new());
    let mut peer = accept(&mut listener).await;

    let call = {
        let node = Arc::new(node);
        tokio::spawn(async move { node.request::<Value>("status").await })
    };
    // The first frame is the caller's request, not an advertisement.
    let frame = recv(&mut peer).await;
    assert_eq!(frame["path"], "status");
    peer.send_json(&json!({"id": frame["id"]}));
    assert_eq!(call.await.unwrap().unwrap(), Value::Null);
}

#[tokio::test]
async fn test_stream_handler_over_the_wire() {
    let (_node, _, mut listener) = start(demo_registry());
    let mut peer = accept(&mut listener).await;
    let _update = recv(&mut peer).await;

    peer.send_json(&json!({"id": 40, "path": "count", "body": {"to": 3}}));
    for n in 1..=3 {
        assert_eq!(recv(&mut peer).await, json!({"id": 40, "body": n}));
    }
}

#[tokio::test]
async fn test_refused_connects_then_recovery() {
    let (transport, mut listener) = MemoryTransport::pair();
    transport.refuse_next(3);
    let transport = Arc::new(transport);
    let node = HubNode::start(&fast_config(), ServiceRegistry::new(), transport.clone());

    let mut states = node.watch_state();
    let mut peer = accept(&mut listener).await;
    assert_eq!(transport.attempts(), 4);

    tokio::time::timeout(WAIT, states.wait_for(ConnectionState::is_connected))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(node.connection().await.unwrap().epoch(), 1);

    let call = node.request::<Value>("status");
    let hub = async {
        let frame = recv(&mut peer).await;
        peer.send_json(&json!({"id": frame["id"], "body": "up"}));
    };
    let (reply, ()) = tokio::join!(call, hub);
    assert_eq!(reply.unwrap(), json!("up"));
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (node, transport, mut listener) = start(ServiceRegistry::new());
    let mut peer = accept(&mut listener).await;

    let call = node.request::<Value>("status");
    let hub = async {
        let frame = recv(&mut peer).await;
        assert!(peer.send("not json"));
        assert!(peer.send(r#"{"path":"no id"}"#));
        peer.send_json(&json!({"id": frame["id"], "body": 1}));
    };
    let (reply, ()) = tokio::join!(call, hub);
    assert_eq!(reply.unwrap(), json!(1));
    assert_eq!(transport.attempts(), 1);
}

#[tokio::test]
async fn test_requests_wait_for_a_connection() {
    let (transport, mut listener) = MemoryTransport::pair();
    transport.refuse_next(2);
    let node = HubNode::start(&fast_config(), ServiceRegistry::new(), Arc::new(transport));

    // Issued before any connection exists.
    let call = node.request::<Value>("status");
    let hub = async {
        let mut peer = accept(&mut listener).await;
        let frame = recv(&mut peer).await;
        peer.send_json(&json!({"id": frame["id"], "body": "ok"}));
        peer
    };
    let (reply, _peer) = tokio::join!(call, hub);
    assert_eq!(reply.unwrap(), json!("ok"));
}

// ---------------------------------------------------------------------------
// Write failures and advertisement replies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_failed_write_reconnects_and_resends() {
    let (inner, mut listener) = MemoryTransport::pair();
    let inner = Arc::new(inner);
    let transport = Arc::new(WriteFailsOnce {
        inner: inner.clone(),
        failed: AtomicBool::new(false),
    });
    let node = HubNode::start(&fast_config(), ServiceRegistry::new(), transport);

    let call = node.request::<Value>("status");
    let hub = async {
        let mut peer = accept(&mut listener).await;
        let frame = recv(&mut peer).await;
        assert_eq!(frame["path"], "status");
        peer.send_json(&json!({"id": frame["id"], "body": "up"}));
        peer
    };
    let (reply, _peer) = tokio::time::timeout(WAIT, async { tokio::join!(call, hub) })
        .await
        .expect("request should be resent on a fresh connection");
    assert_eq!(reply.unwrap(), json!("up"));

    // The write-failed connection was torn down and replaced.
    assert_eq!(inner.attempts(), 1);
    let connection = node.connection().await.unwrap();
    assert_eq!(connection.epoch(), 2);
    assert!(!connection.is_broken());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_advertisement_is_forgotten() {
    let (node, _, mut listener) = start(demo_registry());
    let mut peer = accept(&mut listener).await;
    let update = recv(&mut peer).await;
    assert_eq!(update["path"], UPDATE_PATH);
    while node.pending() == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(node.pending(), 1);

    tokio::time::sleep(UPDATE_REPLY_TIMEOUT + Duration::from_secs(1)).await;
    assert_eq!(node.pending(), 0);
    assert!(node.state().is_connected());
}
