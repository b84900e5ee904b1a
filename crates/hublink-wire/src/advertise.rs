//! Capability advertisement.
//!
//! Right after every successful connect the node tells the peer which paths
//! and apps it serves, so the peer can route requests back. The payload is
//! recomputed from the registry each time; nothing is diffed against earlier
//! connections and nothing is retried outside the reconnect cycle.
//!
//! The peer's reply is only logged. It is awaited for at most
//! [`UPDATE_REPLY_TIMEOUT`]; after that the entry is dropped from the response
//! table so a hub that never answers does not accumulate one per reconnect.

use crate::message::encode_request;
use crate::node::Shared;
use crate::registry::{ResourceHeader, ServiceRegistry};
use crate::supervisor::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Administrative path the advertisement is sent to.
pub const UPDATE_PATH: &str = "hub/service/update";

/// How long the reply to an advertisement is awaited.
pub const UPDATE_REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// One advertised path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub path: String,
}

/// Body of the advertisement request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub services: Vec<ServiceEntry>,
    pub apps: Vec<ResourceHeader>,
}

impl Capabilities {
    /// Everything `registry` currently serves, sorted by path.
    pub fn from_registry(registry: &ServiceRegistry) -> Self {
        let mut services: Vec<ServiceEntry> = registry
            .visible_paths()
            .map(|path| ServiceEntry {
                path: path.to_string(),
            })
            .collect();
        services.sort();

        let mut apps: Vec<ResourceHeader> = registry.visible_apps().cloned().collect();
        apps.sort_by(|a, b| a.path.cmp(&b.path));

        Self { services, apps }
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.apps.is_empty()
    }
}

/// Send the current capabilities on `connection`, fire-and-forget.
///
/// The peer's reply is awaited on a detached task, bounded by
/// [`UPDATE_REPLY_TIMEOUT`], and only logged.
pub(crate) async fn advertise(shared: &Arc<Shared>, connection: &Connection) {
    let capabilities = {
        let registry = shared.registry.read().unwrap_or_else(|e| e.into_inner());
        Capabilities::from_registry(&registry)
    };
    if capabilities.is_empty() {
        debug!("Nothing to advertise");
        return;
    }

    let id = shared.ids.next();
    let frame = match encode_request(id, UPDATE_PATH, Some(&capabilities)) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(error = %e, "Failed to encode capabilities");
            return;
        }
    };
    if let Err(e) = connection.send_text(frame).await {
        warn!(error = %e, "Failed to advertise capabilities");
        return;
    }

    info!(
        id,
        services = capabilities.services.len(),
        apps = capabilities.apps.len(),
        "Advertised capabilities"
    );

    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let reply = tokio::select! {
            reply = tokio::time::timeout(UPDATE_REPLY_TIMEOUT, shared.responses.wait(id)) => reply,
            _ = shared.shutdown.cancelled() => return,
        };
        let Ok(reply) = reply else {
            shared.responses.forget(id);
            debug!(id, "No reply to advertisement");
            return;
        };
        match reply {
            Ok(response) => match response.into_body::<serde_json::Value>() {
                Ok(_) => debug!(id, "Capabilities accepted"),
                Err(e) => warn!(id, error = %e, "Capabilities rejected"),
            },
            Err(e) => debug!(id, error = %e, "Stopped waiting for advertisement reply"),
        }
    });
}
