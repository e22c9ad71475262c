//! Realtime fan-out engine.
//!
//! Every child of a collection path lives in SQLite. A write is persisted,
//! then turned into an [`ChildEvent`] for each subscriber of the collection
//! whose [`Query`] is affected, all under the engine lock, so every
//! subscriber observes the commits of one collection in commit order.
//! Nothing is ordered across collections.
//!
//! Subscribers get a replay of the current matching children (as `Added`)
//! taken atomically with their registration, then live events. Each one has
//! a bounded queue; a subscriber that lets it fill up is dropped and its
//! stream ends with [`Subscription::lagged`] set, so the client can
//! resubscribe and receive a fresh replay.
//!
//! Sessions own on-disconnect removals. Ending a session, explicitly or via
//! heartbeat expiry, runs them exactly once. Registrations are also
//! persisted, and any left over by a previous process run at startup.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use chitchat_shared::{paths, EventKind, UserId};
use chitchat_store::{Database, Node};

use crate::error::{ReadError, WriteError};
use crate::query::Query;
use crate::session::{SessionId, SessionRegistry};

/// One incremental change to a collection, as seen by one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildEvent {
    pub kind: EventKind,
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Live events a subscriber may have queued before it is dropped.
    pub subscriber_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub sessions: usize,
    pub subscribers: usize,
    pub collections: usize,
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

struct Subscriber {
    id: u64,
    query: Query,
    tx: mpsc::Sender<ChildEvent>,
    lagged: Arc<AtomicBool>,
}

impl Subscriber {
    /// Queue an event.  Returns `false` when the subscriber must be dropped.
    fn deliver(&self, collection: &str, event: ChildEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.lagged.store(true, Ordering::Release);
                warn!(
                    subscriber = self.id,
                    collection, "Dropping subscriber that fell behind"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = self.id, collection, "Subscriber went away");
                false
            }
        }
    }
}

/// Stream of [`ChildEvent`]s for one collection.
///
/// Dropping it unsubscribes; the engine releases the queue on its next
/// write to the collection or its next sweep.
pub struct Subscription {
    id: u64,
    collection: String,
    replay: VecDeque<ChildEvent>,
    rx: mpsc::Receiver<ChildEvent>,
    lagged: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// `true` once the engine has dropped this subscriber for falling behind.
    pub fn lagged(&self) -> bool {
        self.lagged.load(Ordering::Acquire)
    }
}

impl Stream for Subscription {
    type Item = ChildEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(event) = self.replay.pop_front() {
            return Poll::Ready(Some(event));
        }
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("pending_replay", &self.replay.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Engine state
// ---------------------------------------------------------------------------

struct EngineState {
    db: Database,
    last_seq: i64,
    subscribers: HashMap<String, Vec<Subscriber>>,
    sessions: SessionRegistry,
    next_subscriber_id: u64,
}

impl EngineState {
    /// Persist `value` at `collection/key` and notify subscribers.
    fn commit(
        &mut self,
        collection: &str,
        key: &str,
        old: Option<Node>,
        value: Value,
    ) -> Result<(), WriteError> {
        if old.as_ref().is_some_and(|n| n.value == value) {
            return Ok(());
        }

        let seq = match &old {
            Some(node) => node.seq,
            None => self.last_seq + 1,
        };
        let node = Node {
            collection: collection.to_string(),
            key: key.to_string(),
            seq,
            value,
        };
        self.db.put_node(&node)?;
        if old.is_none() {
            self.last_seq = seq;
        }

        self.fan_out(collection, key, old.as_ref().map(|n| &n.value), Some(&node.value));
        Ok(())
    }

    fn remove_child(&mut self, collection: &str, key: &str) -> Result<bool, WriteError> {
        let Some(old) = self.db.get_node(collection, key)? else {
            return Ok(false);
        };
        self.db.delete_node(collection, key)?;
        self.fan_out(collection, key, Some(&old.value), None);
        Ok(true)
    }

    fn fan_out(&mut self, collection: &str, key: &str, old: Option<&Value>, new: Option<&Value>) {
        let Some(subscribers) = self.subscribers.get_mut(collection) else {
            return;
        };

        subscribers.retain(|sub| {
            let was = old.is_some_and(|v| sub.query.matches(v));
            let is = new.is_some_and(|v| sub.query.matches(v));
            let (kind, value) = match (was, is, old, new) {
                (false, true, _, Some(v)) => (EventKind::Added, v),
                (true, true, _, Some(v)) => (EventKind::Changed, v),
                (true, false, Some(v), _) => (EventKind::Removed, v),
                _ => return !sub.tx.is_closed(),
            };
            sub.deliver(
                collection,
                ChildEvent {
                    kind,
                    key: key.to_string(),
                    value: value.clone(),
                },
            )
        });

        if subscribers.is_empty() {
            self.subscribers.remove(collection);
        }
    }

    fn register_cleanup(&mut self, session: &SessionId, path: &str) -> Result<(), WriteError> {
        if !self.sessions.contains(session) {
            return Err(WriteError::UnknownSession);
        }
        if self.sessions.has_cleanup(session, path) {
            return Ok(());
        }
        self.db.register_disconnect_op(&session.to_string(), path)?;
        self.sessions.add_cleanup(session, path);
        Ok(())
    }

    fn end_session(&mut self, id: &SessionId) -> usize {
        let Some(info) = self.sessions.close(id) else {
            return 0;
        };

        // A failure here leaves the ops persisted; they run on next startup.
        let ops = match self.db.take_disconnect_ops(&id.to_string()) {
            Ok(ops) => ops,
            Err(e) => {
                warn!(session = %id, error = %e, "Failed to load on-disconnect ops");
                return 0;
            }
        };

        let mut removed = 0;
        for op in ops {
            let Some((collection, key)) = paths::split_child(&op.path) else {
                continue;
            };
            match self.remove_child(collection, key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!(session = %id, path = %op.path, error = %e, "On-disconnect removal failed"),
            }
        }

        info!(
            session = %id,
            user = %info.user,
            removed,
            "Session ended"
        );
        removed
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Cloneable handle to the fan-out engine.
#[derive(Clone)]
pub struct RealtimeEngine {
    state: Arc<Mutex<EngineState>>,
    config: EngineConfig,
}

impl RealtimeEngine {
    /// Take ownership of `db`, running any on-disconnect removals left by a
    /// previous process.
    pub fn open(db: Database, config: EngineConfig) -> Result<Self, WriteError> {
        let last_seq = db.last_seq()?;

        let pending = db.take_all_disconnect_ops()?;
        let mut removed = 0;
        for op in &pending {
            if let Some((collection, key)) = paths::split_child(&op.path) {
                if db.delete_node(collection, key)? {
                    removed += 1;
                }
            }
        }
        if !pending.is_empty() {
            info!(
                pending = pending.len(),
                removed, "Ran on-disconnect removals left by previous run"
            );
        }

        info!(last_seq, "Realtime engine ready");

        Ok(Self {
            state: Arc::new(Mutex::new(EngineState {
                db,
                last_seq,
                subscribers: HashMap::new(),
                sessions: SessionRegistry::default(),
                next_subscriber_id: 1,
            })),
            config,
        })
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Set the child at `path` to `value`.
    pub async fn write(&self, path: &str, value: Value) -> Result<(), WriteError> {
        let (collection, key) = split_child(path)?;
        check_value(&value)?;

        let mut state = self.state.lock().await;
        let old = state.db.get_node(collection, key)?;
        state.commit(collection, key, old, value)
    }

    /// Add a child under a fresh, creation-ordered key and return the key.
    pub async fn push(&self, collection: &str, value: Value) -> Result<String, WriteError> {
        if !paths::is_valid(collection) {
            return Err(WriteError::InvalidPath(collection.to_string()));
        }
        check_value(&value)?;

        let mut state = self.state.lock().await;
        let key = push_key(state.last_seq + 1);
        state.commit(collection, &key, None, value)?;
        Ok(key)
    }

    /// Merge `fields` into the existing object at `path`.
    pub async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<Value, WriteError> {
        self.transact(path, |current| {
            let Some(current) = current else {
                return Err(WriteError::NotFound(path.to_string()));
            };
            let Some(object) = current.as_object() else {
                return Err(WriteError::InvalidValue(format!("{path} is not an object")));
            };
            let mut merged = object.clone();
            merged.extend(fields);
            Ok(Value::Object(merged))
        })
        .await
    }

    /// Single-path read-modify-write.
    ///
    /// `f` sees the current value and returns the new one; no other write to
    /// the engine interleaves between the read and the commit.
    pub async fn transact<F>(&self, path: &str, f: F) -> Result<Value, WriteError>
    where
        F: FnOnce(Option<&Value>) -> Result<Value, WriteError>,
    {
        let (collection, key) = split_child(path)?;

        let mut state = self.state.lock().await;
        let old = state.db.get_node(collection, key)?;
        let next = f(old.as_ref().map(|n| &n.value))?;
        check_value(&next)?;
        state.commit(collection, key, old, next.clone())?;
        Ok(next)
    }

    /// Delete the child at `path`.  Returns `false` if it did not exist.
    pub async fn remove(&self, path: &str) -> Result<bool, WriteError> {
        let (collection, key) = split_child(path)?;
        let mut state = self.state.lock().await;
        state.remove_child(collection, key)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get(&self, path: &str) -> Result<Option<Value>, ReadError> {
        let (collection, key) =
            paths::split_child(path).ok_or_else(|| ReadError::InvalidPath(path.to_string()))?;
        let state = self.state.lock().await;
        Ok(state.db.get_node(collection, key)?.map(|n| n.value))
    }

    /// Current matching children of `collection`.
    pub async fn subscribe_once(
        &self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<(String, Value)>, ReadError> {
        check_collection(collection)?;
        let state = self.state.lock().await;
        let nodes = query.select(state.db.list_nodes(collection)?);
        Ok(nodes.into_iter().map(|n| (n.key, n.value)).collect())
    }

    /// Replay matching children as `Added`, then stream live changes.
    pub async fn subscribe(&self, collection: &str, query: Query) -> Result<Subscription, ReadError> {
        check_collection(collection)?;

        let mut state = self.state.lock().await;
        let replay: VecDeque<ChildEvent> = query
            .select(state.db.list_nodes(collection)?)
            .into_iter()
            .map(|n| ChildEvent {
                kind: EventKind::Added,
                key: n.key,
                value: n.value,
            })
            .collect();

        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let lagged = Arc::new(AtomicBool::new(false));
        let id = state.next_subscriber_id;
        state.next_subscriber_id += 1;

        debug!(
            subscriber = id,
            collection,
            replay = replay.len(),
            "New subscription"
        );

        state
            .subscribers
            .entry(collection.to_string())
            .or_default()
            .push(Subscriber {
                id,
                query,
                tx,
                lagged: lagged.clone(),
            });

        Ok(Subscription {
            id,
            collection: collection.to_string(),
            replay,
            rx,
            lagged,
        })
    }

    /// Release queues of dropped subscriptions.  Returns how many were freed.
    pub async fn prune_closed(&self) -> usize {
        let mut state = self.state.lock().await;
        let mut freed = 0;
        state.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|s| !s.tx.is_closed());
            freed += before - subs.len();
            !subs.is_empty()
        });
        freed
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn open_session(&self, user: UserId) -> SessionId {
        let mut state = self.state.lock().await;
        let id = state.sessions.open(user.clone());
        debug!(session = %id, user = %user, "Session opened");
        id
    }

    /// Heartbeat.  Returns `false` if the session has already ended.
    pub async fn touch(&self, session: &SessionId) -> bool {
        self.state.lock().await.sessions.touch(session)
    }

    /// Remove `path` when `session` ends.  Registering the same path twice is
    /// a no-op.
    pub async fn on_disconnect_remove(&self, session: &SessionId, path: &str) -> Result<(), WriteError> {
        split_child(path)?;

        self.state.lock().await.register_cleanup(session, path)
    }

    /// Write `value` at `path` and remove it when `session` ends.  Both
    /// happen under one lock, so a session reaped in between can never
    /// leave the value behind.
    pub async fn write_until_disconnect(
        &self,
        session: &SessionId,
        path: &str,
        value: Value,
    ) -> Result<(), WriteError> {
        let (collection, key) = split_child(path)?;
        check_value(&value)?;

        let mut state = self.state.lock().await;
        state.register_cleanup(session, path)?;
        let old = state.db.get_node(collection, key)?;
        state.commit(collection, key, old, value)
    }

    /// End a session and run its removals.  Returns the number of children
    /// removed; ending an unknown session does nothing.
    pub async fn close_session(&self, session: &SessionId) -> usize {
        self.state.lock().await.end_session(session)
    }

    /// End every session whose heartbeat is older than `timeout`.
    pub async fn reap_expired(&self, timeout: Duration) -> Vec<SessionId> {
        let mut state = self.state.lock().await;
        let expired = state.sessions.expired(Instant::now(), timeout);
        for id in &expired {
            warn!(session = %id, "Heartbeat timeout, ending session");
            state.end_session(id);
        }
        expired
    }

    pub async fn stats(&self) -> EngineStats {
        let state = self.state.lock().await;
        EngineStats {
            sessions: state.sessions.len(),
            subscribers: state.subscribers.values().map(Vec::len).sum(),
            collections: state.subscribers.len(),
        }
    }
}

/// Keys are the zero-padded hex commit sequence, so they sort in creation
/// order.
fn push_key(seq: i64) -> String {
    format!("{seq:016x}")
}

fn split_child(path: &str) -> Result<(&str, &str), WriteError> {
    paths::split_child(path).ok_or_else(|| WriteError::InvalidPath(path.to_string()))
}

fn check_collection(collection: &str) -> Result<(), ReadError> {
    if paths::is_valid(collection) {
        Ok(())
    } else {
        Err(ReadError::InvalidPath(collection.to_string()))
    }
}

fn check_value(value: &Value) -> Result<(), WriteError> {
    if value.is_null() {
        return Err(WriteError::InvalidValue(
            "null is not storable, remove the child instead".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn engine() -> RealtimeEngine {
        RealtimeEngine::open(Database::open_in_memory().unwrap(), EngineConfig::default()).unwrap()
    }

    async fn next(sub: &mut Subscription) -> ChildEvent {
        tokio::time::timeout(Duration::from_millis(100), sub.next())
            .await
            .expect("event expected")
            .expect("stream ended")
    }

    async fn assert_quiet(sub: &mut Subscription) {
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sub.next())
                .await
                .is_err(),
            "unexpected event"
        );
    }

    #[tokio::test]
    async fn test_replay_then_live_in_order() {
        let engine = engine();
        let k1 = engine.push("c/messages", json!({"n": 1})).await.unwrap();
        let k2 = engine.push("c/messages", json!({"n": 2})).await.unwrap();
        assert!(k1 < k2);

        let mut sub = engine.subscribe("c/messages", Query::all()).await.unwrap();
        let k3 = engine.push("c/messages", json!({"n": 3})).await.unwrap();
        engine
            .update(&format!("c/messages/{k1}"), json!({"seen": true}).as_object().unwrap().clone())
            .await
            .unwrap();

        let events: Vec<_> = vec![
            next(&mut sub).await,
            next(&mut sub).await,
            next(&mut sub).await,
            next(&mut sub).await,
        ];
        assert_eq!(events[0].key, k1);
        assert_eq!(events[1].key, k2);
        assert_eq!((events[2].kind, events[2].key.as_str()), (EventKind::Added, k3.as_str()));
        assert_eq!(events[3].kind, EventKind::Changed);
        assert_eq!(events[3].value, json!({"n": 1, "seen": true}));
    }

    #[tokio::test]
    async fn test_other_collections_not_delivered() {
        let engine = engine();
        let mut sub = engine.subscribe("a", Query::all()).await.unwrap();
        engine.write("b/x", json!(1)).await.unwrap();
        assert_quiet(&mut sub).await;
    }

    #[tokio::test]
    async fn test_equal_to_live_transitions() {
        let engine = engine();
        let mut sub = engine
            .subscribe("t", Query::all().order_by_value().equal_to(true))
            .await
            .unwrap();

        engine.write("t/u1", json!(false)).await.unwrap();
        assert_quiet(&mut sub).await;

        engine.write("t/u1", json!(true)).await.unwrap();
        assert_eq!(next(&mut sub).await.kind, EventKind::Added);

        engine.write("t/u1", json!(false)).await.unwrap();
        let ev = next(&mut sub).await;
        assert_eq!((ev.kind, ev.key.as_str()), (EventKind::Removed, "u1"));
    }

    #[tokio::test]
    async fn test_identical_write_is_silent() {
        let engine = engine();
        let mut sub = engine.subscribe("t", Query::all()).await.unwrap();
        engine.write("t/u1", json!(true)).await.unwrap();
        engine.write("t/u1", json!(true)).await.unwrap();
        assert_eq!(next(&mut sub).await.kind, EventKind::Added);
        assert_quiet(&mut sub).await;
    }

    #[tokio::test]
    async fn test_remove_emits_removed_with_last_value() {
        let engine = engine();
        engine.write("t/u1", json!(true)).await.unwrap();
        let mut sub = engine.subscribe("t", Query::all()).await.unwrap();
        assert_eq!(next(&mut sub).await.kind, EventKind::Added);

        assert!(engine.remove("t/u1").await.unwrap());
        assert!(!engine.remove("t/u1").await.unwrap());
        let ev = next(&mut sub).await;
        assert_eq!(ev.kind, EventKind::Removed);
        assert_eq!(ev.value, json!(true));
    }

    #[tokio::test]
    async fn test_invalid_writes_leave_no_state() {
        let engine = engine();
        assert!(matches!(
            engine.write("toplevel", json!(1)).await,
            Err(WriteError::InvalidPath(_))
        ));
        assert!(matches!(
            engine.write("a/../b", json!(1)).await,
            Err(WriteError::InvalidPath(_))
        ));
        assert!(matches!(
            engine.write("a/b", Value::Null).await,
            Err(WriteError::InvalidValue(_))
        ));
        assert!(matches!(
            engine.update("a/missing", Map::new()).await,
            Err(WriteError::NotFound(_))
        ));
        assert!(engine.subscribe_once("a", &Query::all()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transact_rejection_keeps_value() {
        let engine = engine();
        engine.write("a/b", json!({"v": 1})).await.unwrap();
        let result = engine
            .transact("a/b", |_| Err(WriteError::InvalidValue("nope".into())))
            .await;
        assert!(result.is_err());
        assert_eq!(engine.get("a/b").await.unwrap(), Some(json!({"v": 1})));
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_dropped_as_lagged() {
        let engine = RealtimeEngine::open(
            Database::open_in_memory().unwrap(),
            EngineConfig {
                subscriber_buffer: 2,
            },
        )
        .unwrap();
        let mut sub = engine.subscribe("c", Query::all()).await.unwrap();

        for i in 0..3 {
            engine.push("c", json!(i)).await.unwrap();
        }

        assert_eq!(next(&mut sub).await.value, json!(0));
        assert_eq!(next(&mut sub).await.value, json!(1));
        assert!(sub.next().await.is_none());
        assert!(sub.lagged());
        assert_eq!(engine.stats().await.subscribers, 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let engine = engine();
        let sub = engine.subscribe("c", Query::all()).await.unwrap();
        assert_eq!(engine.stats().await.subscribers, 1);
        drop(sub);
        assert_eq!(engine.prune_closed().await, 1);
        assert_eq!(engine.stats().await.subscribers, 0);
    }

    #[tokio::test]
    async fn test_close_session_runs_removals_once() {
        let engine = engine();
        let session = engine.open_session(UserId::new("u1")).await;
        engine.write("t/u1", json!(true)).await.unwrap();
        engine.on_disconnect_remove(&session, "t/u1").await.unwrap();
        engine.on_disconnect_remove(&session, "t/u1").await.unwrap();

        let mut sub = engine.subscribe("t", Query::all()).await.unwrap();
        assert_eq!(next(&mut sub).await.kind, EventKind::Added);

        assert_eq!(engine.close_session(&session).await, 1);
        assert_eq!(next(&mut sub).await.kind, EventKind::Removed);
        assert_eq!(engine.close_session(&session).await, 0);
        assert!(!engine.touch(&session).await);
        assert!(matches!(
            engine.on_disconnect_remove(&session, "t/u1").await,
            Err(WriteError::UnknownSession)
        ));
    }

    #[tokio::test]
    async fn test_write_until_disconnect() {
        let engine = engine();
        let session = engine.open_session(UserId::new("u1")).await;
        engine
            .write_until_disconnect(&session, "t/u1", json!(true))
            .await
            .unwrap();
        assert_eq!(engine.get("t/u1").await.unwrap(), Some(json!(true)));

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(engine.reap_expired(Duration::ZERO).await, vec![session]);
        assert_eq!(engine.get("t/u1").await.unwrap(), None);

        // ended session: nothing is written
        assert!(matches!(
            engine.write_until_disconnect(&session, "t/u1", json!(true)).await,
            Err(WriteError::UnknownSession)
        ));
        assert_eq!(engine.get("t/u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reap_expired_runs_removals() {
        let engine = engine();
        let session = engine.open_session(UserId::new("u1")).await;
        engine.write("t/u1", json!(true)).await.unwrap();
        engine.on_disconnect_remove(&session, "t/u1").await.unwrap();

        assert!(engine.reap_expired(Duration::from_secs(60)).await.is_empty());
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(engine.reap_expired(Duration::ZERO).await, vec![session]);
        assert_eq!(engine.get("t/u1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_startup_runs_leftover_removals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.db");

        {
            let engine =
                RealtimeEngine::open(Database::open_at(&path).unwrap(), EngineConfig::default())
                    .unwrap();
            let session = engine.open_session(UserId::new("u1")).await;
            engine.write("t/u1", json!(true)).await.unwrap();
            engine.write("t/u2", json!(true)).await.unwrap();
            engine.on_disconnect_remove(&session, "t/u1").await.unwrap();
            // process "crashes": session never closed
        }

        let engine =
            RealtimeEngine::open(Database::open_at(&path).unwrap(), EngineConfig::default())
                .unwrap();
        assert_eq!(engine.get("t/u1").await.unwrap(), None);
        assert_eq!(engine.get("t/u2").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn test_push_keys_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rt.db");

        let first = {
            let engine =
                RealtimeEngine::open(Database::open_at(&path).unwrap(), EngineConfig::default())
                    .unwrap();
            engine.push("c", json!(1)).await.unwrap()
        };
        let engine =
            RealtimeEngine::open(Database::open_at(&path).unwrap(), EngineConfig::default())
                .unwrap();
        let second = engine.push("c", json!(2)).await.unwrap();
        assert!(first < second);
    }
}
