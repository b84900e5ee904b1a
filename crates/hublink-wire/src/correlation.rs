//! Request ids and response correlation.
//!
//! The [`ResponseTable`] pairs inbound responses with the callers waiting
//! for them, whichever side shows up first:
//!
//! - a response with no waiter is parked until exactly one waiter takes it;
//! - a waiter with no response parks a notifier until the response lands;
//! - further waiters on an already-waiting id are appended and all receive
//!   the same response, in registration order.
//!
//! Once delivered the entry is gone; a waiter that arrives later waits for a
//! new response with that id.

use crate::error::WireError;
use crate::message::Response;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

/// Monotonic request id allocator.
///
/// Ids wrap from `u32::MAX` back to `0`. A wrapped id could collide with a
/// request still outstanding four billion requests later; that risk is
/// accepted rather than guarded against.
#[derive(Debug, Default)]
pub struct MessageIds {
    last: AtomicU32,
}

impl MessageIds {
    /// Start a counter whose first id is `last + 1` (wrapping).
    pub fn starting_after(last: u32) -> Self {
        Self {
            last: AtomicU32::new(last),
        }
    }

    /// Allocate the next id.
    pub fn next(&self) -> u32 {
        // fetch_add wraps on overflow.
        self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

enum Slot {
    Waiting(Vec<oneshot::Sender<Response>>),
    Received(Response),
}

/// Thread-safe map from request id to its response or its waiters.
#[derive(Default)]
pub struct ResponseTable {
    slots: Mutex<HashMap<u32, Slot>>,
}

impl ResponseTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a response to its waiters, or park it until one arrives.
    ///
    /// A parked response for the same id is replaced.
    pub fn deliver(&self, response: Response) {
        let waiters = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            match slots.remove(&response.id) {
                Some(Slot::Waiting(waiters)) => waiters,
                _ => {
                    slots.insert(response.id, Slot::Received(response));
                    return;
                }
            }
        };

        for waiter in waiters {
            // A dropped receiver is a cancelled caller.
            let _ = waiter.send(response.clone());
        }
    }

    /// Wait for the response to `id`.
    ///
    /// Returns immediately if the response is already parked. Otherwise
    /// suspends until [`deliver`](Self::deliver) is called for `id`; there is
    /// no timeout.
    pub async fn wait(&self, id: u32) -> Result<Response, WireError> {
        let rx = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let (tx, rx) = oneshot::channel();
            match slots.remove(&id) {
                Some(Slot::Received(response)) => return Ok(response),
                Some(Slot::Waiting(mut waiters)) => {
                    waiters.push(tx);
                    slots.insert(id, Slot::Waiting(waiters));
                }
                None => {
                    slots.insert(id, Slot::Waiting(vec![tx]));
                }
            }
            rx
        };

        rx.await.map_err(|_| WireError::Shutdown)
    }

    /// Drop whatever is pending for `id`; its waiters see `Shutdown`.
    pub fn forget(&self, id: u32) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    /// Number of ids with a parked response or registered waiters.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether no id is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
