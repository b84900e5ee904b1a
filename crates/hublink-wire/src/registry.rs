//! Inbound handler registry and dispatch.
//!
//! A [`ServiceRegistry`] maps paths to local responders so the peer can call
//! into this node. Handlers come in two shapes:
//!
//! - **unary**: one decoded input, one response envelope;
//! - **stream**: one decoded input, zero or more response envelopes that all
//!   reuse the request id, pushed through a [`StreamEmitter`].
//!
//! Handlers may be bundled into named [`ServiceGroup`]s that can be switched
//! off as a unit. A disabled group's paths disappear from the advertised
//! capabilities and answer as unknown, but stay registered.
//!
//! Registering a path twice keeps the last handler.

use crate::message::{encode_body, Request, Response};
use crate::supervisor::Connection;
use anyhow::anyhow;
use futures::future::{self, BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Failure message for requests to paths this node does not serve.
pub const UNKNOWN_PATH: &str = "unknown path";

type UnaryFn = dyn Fn(Option<Value>) -> BoxFuture<'static, anyhow::Result<Option<Value>>>
    + Send
    + Sync;
type StreamFn =
    dyn Fn(Option<Value>, StreamEmitter) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A type-erased responder.
#[derive(Clone)]
pub(crate) enum Handler {
    Unary(Arc<UnaryFn>),
    Stream(Arc<StreamFn>),
}

/// Kind of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    App,
}

/// A resource this node declares to the peer, e.g. an app with an interface.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceHeader {
    #[serde(rename = "type")]
    pub kind: ResourceKind,
    pub name: String,
    pub path: String,
}

impl ResourceHeader {
    pub fn app(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::App,
            name: name.into(),
            path: path.into(),
        }
    }
}

/// Push side of a streaming handler. Every emitted value becomes one
/// response envelope carrying the request id.
#[derive(Debug, Clone)]
pub struct StreamEmitter {
    tx: mpsc::UnboundedSender<Value>,
}

impl StreamEmitter {
    /// Emit one item. Fails once the stream is no longer being served.
    pub fn emit<T: Serialize + ?Sized>(&self, item: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(item)?;
        self.tx
            .send(value)
            .map_err(|_| anyhow!("stream is no longer being served"))
    }

    /// Whether the receiving side is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Route {
    handler: Handler,
    group: Option<String>,
}

struct DeclaredApp {
    header: ResourceHeader,
    group: Option<String>,
}

/// Registered responders, resource declarations and group switches.
#[derive(Default)]
pub struct ServiceRegistry {
    routes: HashMap<String, Route>,
    apps: Vec<DeclaredApp>,
    groups: HashSet<String>,
    disabled: HashSet<String>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unary handler at `path`.
    pub fn unary<I, O, F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.insert_route(path.into(), unary_handler(handler), None);
        self
    }

    /// Register a streaming handler at `path`.
    pub fn stream<I, F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, StreamEmitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.insert_route(path.into(), stream_handler(handler), None);
        self
    }

    /// Declare an app. Its header is advertised and requests to its path
    /// stream back one `{"header", "body"}` value holding `interface`.
    pub fn app(
        mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        interface: Value,
    ) -> Self {
        self.insert_app(ResourceHeader::app(name, path), interface, None);
        self
    }

    /// Add a group of handlers that can be switched as a unit.
    pub fn group(mut self, group: ServiceGroup) -> Self {
        let ServiceGroup {
            name,
            routes,
            apps,
            enabled,
        } = group;

        for (path, handler) in routes {
            self.insert_route(path, handler, Some(name.clone()));
        }
        for (header, interface) in apps {
            self.insert_app(header, interface, Some(name.clone()));
        }
        if !enabled {
            self.disabled.insert(name.clone());
        }
        self.groups.insert(name);
        self
    }

    /// Enable or disable a group. Returns `false` if no such group exists.
    pub fn set_group_enabled(&mut self, name: &str, enabled: bool) -> bool {
        if !self.groups.contains(name) {
            warn!(group = name, "No such service group");
            return false;
        }
        let changed = if enabled {
            self.disabled.remove(name)
        } else {
            self.disabled.insert(name.to_string())
        };
        if changed {
            info!(group = name, enabled, "Service group toggled");
        }
        true
    }

    /// Whether `name` is a registered, enabled group.
    pub fn is_group_enabled(&self, name: &str) -> bool {
        self.groups.contains(name) && !self.disabled.contains(name)
    }

    /// Whether `path` has a handler, enabled or not.
    pub fn contains(&self, path: &str) -> bool {
        self.routes.contains_key(path)
    }

    /// The handler serving `path`, unless it is missing or switched off.
    pub(crate) fn route(&self, path: &str) -> Option<Handler> {
        let route = self.routes.get(path)?;
        if self.is_hidden(route.group.as_deref()) {
            return None;
        }
        Some(route.handler.clone())
    }

    /// Paths currently served.
    pub(crate) fn visible_paths(&self) -> impl Iterator<Item = &str> {
        self.routes
            .iter()
            .filter(|(_, route)| !self.is_hidden(route.group.as_deref()))
            .map(|(path, _)| path.as_str())
    }

    /// Resource headers currently declared.
    pub(crate) fn visible_apps(&self) -> impl Iterator<Item = &ResourceHeader> {
        self.apps
            .iter()
            .filter(|app| !self.is_hidden(app.group.as_deref()))
            .map(|app| &app.header)
    }

    fn is_hidden(&self, group: Option<&str>) -> bool {
        group.is_some_and(|g| self.disabled.contains(g))
    }

    fn insert_route(&mut self, path: String, handler: Handler, group: Option<String>) {
        let previous = self.routes.insert(path.clone(), Route { handler, group });
        if previous.is_some() {
            warn!(%path, "Handler re-registered, keeping the latest");
        }
    }

    fn insert_app(&mut self, header: ResourceHeader, interface: Value, group: Option<String>) {
        let path = header.path.clone();
        let handler = app_handler(header.clone(), interface);
        self.apps.retain(|app| app.header.path != path);
        self.apps.push(DeclaredApp {
            header,
            group: group.clone(),
        });
        self.insert_route(path, handler, group);
    }
}

/// A named bundle of handlers, added with [`ServiceRegistry::group`].
pub struct ServiceGroup {
    name: String,
    routes: Vec<(String, Handler)>,
    apps: Vec<(ResourceHeader, Value)>,
    enabled: bool,
}

impl ServiceGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            routes: Vec::new(),
            apps: Vec::new(),
            enabled: true,
        }
    }

    /// Start the group switched off.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn unary<I, O, F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
    {
        self.routes.push((path.into(), unary_handler(handler)));
        self
    }

    pub fn stream<I, F, Fut>(mut self, path: impl Into<String>, handler: F) -> Self
    where
        I: DeserializeOwned + Send + 'static,
        F: Fn(I, StreamEmitter) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.routes.push((path.into(), stream_handler(handler)));
        self
    }

    pub fn app(
        mut self,
        name: impl Into<String>,
        path: impl Into<String>,
        interface: Value,
    ) -> Self {
        self.apps.push((ResourceHeader::app(name, path), interface));
        self
    }
}

fn decode_input<I: DeserializeOwned>(body: Option<Value>) -> anyhow::Result<I> {
    serde_json::from_value(body.unwrap_or(Value::Null)).map_err(|e| anyhow!("invalid input: {e}"))
}

fn unary_handler<I, O, F, Fut>(handler: F) -> Handler
where
    I: DeserializeOwned + Send + 'static,
    O: Serialize + Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<O>> + Send + 'static,
{
    Handler::Unary(Arc::new(
        move |body: Option<Value>| -> BoxFuture<'static, anyhow::Result<Option<Value>>> {
            match decode_input::<I>(body) {
                Ok(input) => {
                    let output = handler(input);
                    async move { Ok(encode_body(&output.await?)?) }.boxed()
                }
                Err(e) => future::ready(Err(e)).boxed(),
            }
        },
    ))
}

fn stream_handler<I, F, Fut>(handler: F) -> Handler
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(I, StreamEmitter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Handler::Stream(Arc::new(
        move |body: Option<Value>, emitter: StreamEmitter| -> BoxFuture<'static, anyhow::Result<()>> {
            match decode_input::<I>(body) {
                Ok(input) => handler(input, emitter).boxed(),
                Err(e) => future::ready(Err(e)).boxed(),
            }
        },
    ))
}

fn app_handler(header: ResourceHeader, interface: Value) -> Handler {
    let item = json!({ "header": header, "body": interface });
    Handler::Stream(Arc::new(
        move |_body: Option<Value>, emitter: StreamEmitter| -> BoxFuture<'static, anyhow::Result<()>> {
            future::ready(emitter.emit(&item)).boxed()
        },
    ))
}

/// Serve one inbound request on its own task.
pub(crate) fn dispatch(registry: &RwLock<ServiceRegistry>, connection: &Connection, request: Request) {
    let handler = registry
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .route(&request.path);
    let connection = connection.clone();
    tokio::spawn(serve(handler, connection, request));
}

async fn serve(handler: Option<Handler>, connection: Connection, request: Request) {
    let Request { id, path, body } = request;
    match handler {
        None => {
            debug!(id, %path, "Request for unknown path");
            respond(&connection, &path, Response::failure(id, UNKNOWN_PATH)).await;
        }
        Some(Handler::Unary(handler)) => {
            let response = match handler(body).await {
                Ok(output) => Response::success(id, output),
                Err(e) => {
                    debug!(id, %path, error = %e, "Handler failed");
                    Response::failure(id, format!("{e:#}"))
                }
            };
            respond(&connection, &path, response).await;
        }
        Some(Handler::Stream(handler)) => serve_stream(handler, connection, id, path, body).await,
    }
}

async fn serve_stream(
    handler: Arc<StreamFn>,
    connection: Connection,
    id: u32,
    path: String,
    body: Option<Value>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut running = handler(body, StreamEmitter { tx });

    let result = loop {
        tokio::select! {
            biased;
            Some(item) = rx.recv() => {
                if !respond(&connection, &path, Response::success(id, Some(item))).await {
                    return;
                }
            }
            result = &mut running => break result,
        }
    };

    // Items emitted right before the handler returned.
    while let Ok(item) = rx.try_recv() {
        if !respond(&connection, &path, Response::success(id, Some(item))).await {
            return;
        }
    }

    if let Err(e) = result {
        debug!(id, %path, error = %e, "Stream handler failed");
        respond(&connection, &path, Response::failure(id, format!("{e:#}"))).await;
    }
}

/// Write one response; `false` once the connection is gone.
async fn respond(connection: &Connection, path: &str, response: Response) -> bool {
    match connection.send_response(&response).await {
        Ok(()) => true,
        Err(e) => {
            debug!(id = response.id, %path, error = %e, "Dropping response");
            false
        }
    }
}
