//! Connection handles and disconnect hooks
//!
//! The watch registry and the directory never own a connection. They only attach
//! a [`DisconnectHook`] to it, which the connection runs exactly once when it
//! terminates. [`Session`] is the in-process implementation used by the server.

use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// Opaque identity of one subscriber connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh, random connection id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single-shot cleanup run when a connection terminates
pub type DisconnectHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// A live connection that watches and records can be attributed to
pub trait Connection: Send + Sync {
    /// Identity used as an index key
    fn id(&self) -> ConnectionId;

    /// Register `hook` to run exactly once when the connection terminates.
    ///
    /// A hook is never run twice and never run for a connection that stays up.
    fn on_disconnect(&self, hook: DisconnectHook);
}

/// In-process connection handle
pub struct Session {
    id: ConnectionId,
    // None once disconnected
    hooks: Mutex<Option<Vec<DisconnectHook>>>,
}

impl Session {
    /// Create a new live session
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            hooks: Mutex::new(Some(Vec::new())),
        }
    }

    /// Whether `disconnect` has been called
    pub fn is_closed(&self) -> bool {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Terminate the session, running every registered hook once.
    ///
    /// Later calls are no-ops.
    pub async fn disconnect(&self) {
        let hooks = self
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(hooks) = hooks else {
            return;
        };

        debug!(connection = %self.id, hooks = hooks.len(), "Session disconnected");
        join_all(hooks.into_iter().map(|hook| hook())).await;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection for Session {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn on_disconnect(&self, hook: DisconnectHook) {
        let mut hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = hooks.as_mut() {
            pending.push(hook);
            return;
        }
        drop(hooks);

        // Already closed: the caller may hold locks the hook needs
        debug!(connection = %self.id, "Hook registered after disconnect, running now");
        tokio::spawn(hook());
    }
}
