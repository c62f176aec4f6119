//! Watch registry for directory events
//!
//! Watches are indexed twice under one lock: by subscriber identity, so `notify`
//! only walks the bucket for the record's identity, and by connection, so every
//! watch of a disconnected connection can be dropped at once.

use crate::connection::{Connection, ConnectionId};
use crate::matcher::matches;
use crate::metrics::WatchMetrics;
use crate::Result;
use directory_api::{Action, Event, Query, ServiceRecord};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

/// Callback invoked with each event matching a watch
pub type WatchCallback = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`WatchCallback`] from an async closure
pub fn callback<F, Fut>(f: F) -> WatchCallback
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |event: Event| f(event).boxed())
}

/// Identifier of a registered watch, increasing in registration order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchId(u64);

impl fmt::Display for WatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Watch {
    query: Query,
    callback: WatchCallback,
}

/// Position of a watch in `by_identity`, recorded under its connection
struct WatchRef {
    identity: String,
    id: WatchId,
}

#[derive(Default)]
struct WatchIndex {
    next_id: u64,
    // BTreeMap keeps insertion order since ids only grow
    by_identity: HashMap<String, BTreeMap<WatchId, Watch>>,
    by_connection: HashMap<ConnectionId, Vec<WatchRef>>,
}

impl WatchIndex {
    fn insert(&mut self, connection: ConnectionId, query: Query, callback: WatchCallback) -> WatchId {
        self.next_id += 1;
        let id = WatchId(self.next_id);
        let identity = query.identity.clone();

        self.by_identity
            .entry(identity.clone())
            .or_default()
            .insert(id, Watch { query, callback });
        self.by_connection
            .entry(connection)
            .or_default()
            .push(WatchRef { identity, id });

        id
    }

    fn remove_from_bucket(&mut self, watch: &WatchRef) -> bool {
        let Some(bucket) = self.by_identity.get_mut(&watch.identity) else {
            return false;
        };
        let removed = bucket.remove(&watch.id).is_some();
        if bucket.is_empty() {
            self.by_identity.remove(&watch.identity);
        }
        removed
    }

    fn remove(&mut self, connection: ConnectionId, id: WatchId) -> bool {
        let Some(refs) = self.by_connection.get_mut(&connection) else {
            return false;
        };
        let Some(pos) = refs.iter().position(|watch| watch.id == id) else {
            return false;
        };
        let watch = refs.swap_remove(pos);
        if refs.is_empty() {
            self.by_connection.remove(&connection);
        }
        self.remove_from_bucket(&watch)
    }

    fn remove_connection(&mut self, connection: ConnectionId) -> usize {
        let Some(refs) = self.by_connection.remove(&connection) else {
            return 0;
        };
        let mut removed = 0;
        for watch in &refs {
            if self.remove_from_bucket(watch) {
                removed += 1;
            }
        }
        removed
    }
}

struct HubState {
    index: RwLock<WatchIndex>,
    metrics: WatchMetrics,
}

impl HubState {
    async fn remove_connection(&self, connection: ConnectionId) -> usize {
        let mut index = self.index.write().await;
        let removed = index.remove_connection(connection);
        if removed > 0 {
            self.metrics.watches.sub(removed as i64);
            self.metrics.disconnect_cleanups.inc();
            debug!(connection = %connection, removed, "Removed watches for connection");
        }
        removed
    }
}

/// WatcherHub holds standing watches and notifies them of directory events
pub struct WatcherHub {
    state: Arc<HubState>,
}

impl WatcherHub {
    /// Create an empty hub with its own metrics registry
    pub fn new() -> Result<Self> {
        Ok(Self::with_metrics(WatchMetrics::new()?))
    }

    /// Create an empty hub reporting into `metrics`
    pub fn with_metrics(metrics: WatchMetrics) -> Self {
        Self {
            state: Arc::new(HubState {
                index: RwLock::new(WatchIndex::default()),
                metrics,
            }),
        }
    }

    /// Register a watch that fires for every future event matching `query`.
    ///
    /// The watch lives until it is unregistered or `connection` disconnects.
    /// Each call attaches its own disconnect hook; whichever hook fires first
    /// removes every watch of the connection and the rest find nothing left.
    /// Hooks stay attached for the connection's lifetime: `unregister_watcher`
    /// removes the watch but not its hook, so a long-lived connection that
    /// churns watches accumulates one hook per call until it disconnects.
    pub async fn register_watcher(
        &self,
        connection: &dyn Connection,
        query: Query,
        callback: WatchCallback,
    ) -> WatchId {
        let connection_id = connection.id();
        let mut index = self.state.index.write().await;

        let state: Weak<HubState> = Arc::downgrade(&self.state);
        connection.on_disconnect(Box::new(move || {
            async move {
                if let Some(state) = state.upgrade() {
                    state.remove_connection(connection_id).await;
                }
            }
            .boxed()
        }));

        let identity = query.identity.clone();
        let id = index.insert(connection_id, query, callback);
        self.state.metrics.watches.inc();

        debug!(
            connection = %connection_id,
            identity = %identity,
            watch = %id,
            "Registered watcher"
        );
        id
    }

    /// Remove a single watch. Returns false if `connection` holds no such watch.
    pub async fn unregister_watcher(&self, connection: ConnectionId, id: WatchId) -> bool {
        let mut index = self.state.index.write().await;
        let removed = index.remove(connection, id);
        if removed {
            self.state.metrics.watches.dec();
            debug!(connection = %connection, watch = %id, "Unregistered watcher");
        }
        removed
    }

    /// Remove every watch attributed to `connection`, as its disconnect hook does
    pub async fn remove_connection(&self, connection: ConnectionId) -> usize {
        self.state.remove_connection(connection).await
    }

    /// Dispatch `action` on `record` to every matching watch.
    ///
    /// Matching callbacks are spawned in registration order and never awaited; a
    /// callback never runs under the registry lock and may call back into the hub.
    /// Returns the number spawned.
    pub async fn notify(&self, record: &ServiceRecord, action: Action) -> usize {
        let index = self.state.index.read().await;

        let Some(bucket) = index.by_identity.get(&record.identity) else {
            debug!(identity = %record.identity, "No watchers for identity");
            return 0;
        };

        let mut dispatched = 0;
        for watch in bucket.values() {
            if !matches(record, &watch.query) {
                continue;
            }
            let callback = Arc::clone(&watch.callback);
            let event = Event::new(action, record.clone());
            tokio::spawn(async move { callback(event).await });
            dispatched += 1;
        }

        self.state
            .metrics
            .notifications_dispatched
            .inc_by(dispatched as u64);
        debug!(
            identity = %record.identity,
            id = %record.id,
            action = ?action,
            dispatched,
            "Notified watchers"
        );
        dispatched
    }

    /// Total number of live watches
    pub async fn watch_count(&self) -> usize {
        let index = self.state.index.read().await;
        index.by_identity.values().map(BTreeMap::len).sum()
    }

    /// Number of identities with at least one watch
    pub async fn identity_count(&self) -> usize {
        self.state.index.read().await.by_identity.len()
    }

    /// Whether any watch is indexed under `identity`
    pub async fn has_identity(&self, identity: &str) -> bool {
        self.state.index.read().await.by_identity.contains_key(identity)
    }

    /// Number of watches attributed to `connection`
    pub async fn connection_watch_count(&self, connection: ConnectionId) -> usize {
        let index = self.state.index.read().await;
        index.by_connection.get(&connection).map_or(0, Vec::len)
    }

    pub fn metrics(&self) -> &WatchMetrics {
        &self.state.metrics
    }
}

impl Default for WatcherHub {
    fn default() -> Self {
        Self::new().expect("Failed to create default WatcherHub")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Session;
    use directory_api::Field;
    use std::time::Duration;
    use tokio::sync::mpsc;

    type Received = mpsc::UnboundedReceiver<(&'static str, Event)>;

    fn tagged(tag: &'static str, tx: &mpsc::UnboundedSender<(&'static str, Event)>) -> WatchCallback {
        let tx = tx.clone();
        callback(move |event| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((tag, event));
            }
        })
    }

    fn record(identity: &str, name: &str) -> ServiceRecord {
        ServiceRecord::default()
            .with_field(Field::Identity, identity)
            .with_field(Field::Name, name)
            .with_field(Field::Id, format!("{}-{}", identity, name))
    }

    async fn next(rx: &mut Received) -> (&'static str, Event) {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for callback")
            .expect("channel closed")
    }

    async fn drain(rx: &mut Received) -> Vec<&'static str> {
        // Let every dispatched callback run
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let mut tags = Vec::new();
        while let Ok((tag, _)) = rx.try_recv() {
            tags.push(tag);
        }
        tags
    }

    #[tokio::test]
    async fn test_notify_without_watchers_is_noop() {
        let hub = WatcherHub::default();
        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 0);
        assert_eq!(hub.identity_count().await, 0);
    }

    #[tokio::test]
    async fn test_isolation_by_identity() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::new("alice"), tagged("alice", &tx))
            .await;

        assert_eq!(hub.notify(&record("bob", "db"), Action::Registered).await, 0);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_wildcard_and_exact_watchers() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::new("alice"), tagged("c1", &tx))
            .await;
        hub.register_watcher(
            &session,
            Query::new("alice").with_field(Field::Name, "db"),
            tagged("c2", &tx),
        )
        .await;

        let db = record("alice", "db");
        assert_eq!(hub.notify(&db, Action::Registered).await, 2);
        let mut tags = Vec::new();
        for _ in 0..2 {
            let (tag, event) = next(&mut rx).await;
            assert_eq!(event, Event::new(Action::Registered, db.clone()));
            tags.push(tag);
        }
        tags.sort();
        assert_eq!(tags, vec!["c1", "c2"]);

        assert_eq!(hub.notify(&record("alice", "cache"), Action::Registered).await, 1);
        assert_eq!(drain(&mut rx).await, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_disconnect_removes_watches_and_bucket() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::new("alice"), tagged("c1", &tx))
            .await;
        hub.register_watcher(
            &session,
            Query::new("alice").with_field(Field::Name, "db"),
            tagged("c2", &tx),
        )
        .await;
        assert!(hub.has_identity("alice").await);

        session.disconnect().await;

        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 0);
        assert!(drain(&mut rx).await.is_empty());
        assert!(!hub.has_identity("alice").await);
        assert_eq!(hub.watch_count().await, 0);
        assert_eq!(hub.connection_watch_count(session.id()).await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_removes_all_watches_of_connection() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::new("alice").with_field(Field::Name, "db"), tagged("w1", &tx))
            .await;
        hub.register_watcher(&session, Query::new("alice").with_field(Field::Name, "db"), tagged("w2", &tx))
            .await;
        hub.register_watcher(&session, Query::new("alice").with_field(Field::Name, "cache"), tagged("w3", &tx))
            .await;
        assert_eq!(hub.connection_watch_count(session.id()).await, 3);

        let db = record("alice", "db");
        assert_eq!(hub.notify(&db, Action::Registered).await, 2);
        let mut tags = drain(&mut rx).await;
        tags.sort();
        assert_eq!(tags, vec!["w1", "w2"]);

        session.disconnect().await;
        assert_eq!(hub.watch_count().await, 0);
        assert_eq!(hub.notify(&db, Action::Registered).await, 0);
        assert_eq!(hub.notify(&record("alice", "cache"), Action::Registered).await, 0);
        assert!(drain(&mut rx).await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_leaves_other_connections() {
        let hub = WatcherHub::default();
        let first = Session::new();
        let second = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&first, Query::new("alice"), tagged("first", &tx))
            .await;
        hub.register_watcher(&second, Query::new("alice"), tagged("second", &tx))
            .await;

        first.disconnect().await;

        assert!(hub.has_identity("alice").await);
        assert_eq!(hub.notify(&record("alice", "db"), Action::Deregistered).await, 1);
        let (tag, event) = next(&mut rx).await;
        assert_eq!(tag, "second");
        assert_eq!(event.action, Action::Deregistered);
    }

    // Spawned callbacks start in spawn order only on the current-thread runtime
    #[tokio::test(flavor = "current_thread")]
    async fn test_dispatch_follows_registration_order() {
        let hub = WatcherHub::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sessions = [Session::new(), Session::new(), Session::new()];

        for (session, tag) in sessions.iter().zip(["w1", "w2", "w3"]) {
            hub.register_watcher(session, Query::new("alice"), tagged(tag, &tx))
                .await;
        }

        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 3);
        assert_eq!(drain(&mut rx).await, vec!["w1", "w2", "w3"]);
    }

    #[tokio::test]
    async fn test_unregister_single_watch() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let other = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = hub
            .register_watcher(&session, Query::new("alice"), tagged("first", &tx))
            .await;
        let second = hub
            .register_watcher(&session, Query::new("bob"), tagged("second", &tx))
            .await;
        assert!(first < second);

        assert!(!hub.unregister_watcher(other.id(), first).await);
        assert!(hub.unregister_watcher(session.id(), first).await);
        assert!(!hub.unregister_watcher(session.id(), first).await);

        assert!(!hub.has_identity("alice").await);
        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 0);
        assert_eq!(hub.notify(&record("bob", "db"), Action::Registered).await, 1);
        assert_eq!(drain(&mut rx).await, vec!["second"]);
        assert_eq!(hub.metrics().watches.get(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_identity_only_sees_empty_identity() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::default(), tagged("all", &tx))
            .await;

        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 0);
        assert_eq!(hub.notify(&record("", "db"), Action::Registered).await, 1);
        assert_eq!(drain(&mut rx).await, vec!["all"]);
    }

    #[tokio::test]
    async fn test_callback_can_register_watch() {
        let hub = Arc::new(WatcherHub::default());
        let session = Arc::new(Session::new());
        let (tx, mut rx) = mpsc::unbounded_channel();

        let reentrant = {
            let hub = hub.clone();
            let session = session.clone();
            let tx = tx.clone();
            callback(move |_event| {
                let hub = hub.clone();
                let session = session.clone();
                let tx = tx.clone();
                async move {
                    hub.register_watcher(&*session, Query::new("bob"), tagged("bob", &tx))
                        .await;
                    let _ = tx.send(("registered", Event::new(Action::Registered, ServiceRecord::default())));
                }
            })
        };
        hub.register_watcher(&*session, Query::new("alice"), reentrant)
            .await;

        hub.notify(&record("alice", "db"), Action::Registered).await;
        let (tag, _) = next(&mut rx).await;
        assert_eq!(tag, "registered");
        assert!(hub.has_identity("bob").await);
    }

    #[tokio::test]
    async fn test_registration_on_closed_session_is_cleaned_up() {
        let hub = WatcherHub::default();
        let session = Session::new();
        session.disconnect().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        hub.register_watcher(&session, Query::new("alice"), tagged("late", &tx))
            .await;

        tokio::time::timeout(Duration::from_secs(1), async {
            while hub.has_identity("alice").await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watch was not removed");
    }

    #[tokio::test]
    async fn test_metrics_track_watches() {
        let hub = WatcherHub::default();
        let session = Session::new();
        let (tx, _rx) = mpsc::unbounded_channel();

        hub.register_watcher(&session, Query::new("alice"), tagged("a", &tx))
            .await;
        hub.register_watcher(&session, Query::new("bob"), tagged("b", &tx))
            .await;
        assert_eq!(hub.metrics().watches.get(), 2);

        hub.notify(&record("alice", "db"), Action::Registered).await;
        assert_eq!(hub.metrics().notifications_dispatched.get(), 1);

        assert_eq!(hub.remove_connection(session.id()).await, 2);
        assert_eq!(hub.metrics().watches.get(), 0);
        assert_eq!(hub.metrics().disconnect_cleanups.get(), 1);
        assert_eq!(hub.identity_count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_notify_sees_disconnect_all_or_nothing() {
        const WATCHES: usize = 8;
        let hub = Arc::new(WatcherHub::default());
        let session = Arc::new(Session::new());

        for _ in 0..WATCHES {
            hub.register_watcher(&*session, Query::new("alice"), callback(|_| async {}))
                .await;
        }

        let notifier = {
            let hub = hub.clone();
            tokio::spawn(async move {
                let db = record("alice", "db");
                let mut seen = Vec::new();
                for _ in 0..100_000 {
                    let dispatched = hub.notify(&db, Action::Registered).await;
                    seen.push(dispatched);
                    if dispatched == 0 {
                        break;
                    }
                    tokio::task::yield_now().await;
                }
                seen
            })
        };

        let disconnect = {
            let session = session.clone();
            tokio::spawn(async move { session.disconnect().await })
        };

        tokio::time::timeout(Duration::from_secs(5), disconnect)
            .await
            .expect("disconnect timed out")
            .unwrap();
        let seen = tokio::time::timeout(Duration::from_secs(5), notifier)
            .await
            .expect("notifier timed out")
            .unwrap();

        assert!(seen.iter().all(|&n| n == WATCHES || n == 0), "partial dispatch: {:?}", seen);
        assert_eq!(hub.notify(&record("alice", "db"), Action::Registered).await, 0);
        assert_eq!(hub.watch_count().await, 0);
        assert!(!hub.has_identity("alice").await);
    }
}
