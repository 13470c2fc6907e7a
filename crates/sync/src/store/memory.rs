use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Number, Value};
use tokio::sync::{mpsc, watch};

use super::query::{evaluate, Row};
use super::{
    CollectionPath, Delivery, DocPath, Document, DocumentStore, FieldOp, Listener, ListenerId,
    Query, Snapshot,
};
use crate::error::{Result, SyncError};

struct StoredDoc {
    data: Map<String, Value>,
    seq: u64,
}

struct ListenerEntry {
    query: Query,
    tx: mpsc::UnboundedSender<Delivery>,
    /// Last snapshot handed out, so unchanged result sets are not redelivered.
    last: Option<Snapshot>,
}

enum FaultScope {
    Any,
    Prefix(String),
    Exact(String),
}

impl FaultScope {
    fn matches(&self, path: &str) -> bool {
        match self {
            FaultScope::Any => true,
            FaultScope::Prefix(prefix) => path.starts_with(prefix.as_str()),
            FaultScope::Exact(exact) => path == exact,
        }
    }
}

struct Fault {
    scope: FaultScope,
    /// Writes left to fail; `None` fails until cleared.
    remaining: Option<usize>,
    error: SyncError,
}

struct Inner {
    collections: HashMap<CollectionPath, BTreeMap<String, StoredDoc>>,
    listeners: HashMap<ListenerId, ListenerEntry>,
    next_listener: ListenerId,
    next_seq: u64,
    /// Bumped on every applied write.
    version: u64,
    connected: bool,
    faults: Vec<Fault>,
}

impl Inner {
    fn snapshot(&self, query: &Query) -> Snapshot {
        let mut snapshot = match self.collections.get(&query.collection) {
            Some(docs) => evaluate(
                query,
                docs.iter().map(|(id, d)| Row {
                    id,
                    data: &d.data,
                    seq: d.seq,
                }),
            ),
            None => Snapshot::default(),
        };
        snapshot.version = self.version;
        snapshot
    }

    fn take_fault(&mut self, path: &str) -> Option<SyncError> {
        let idx = self.faults.iter().position(|f| f.scope.matches(path))?;
        let fault = &mut self.faults[idx];
        let error = fault.error.clone();
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.faults.remove(idx);
            }
        }
        Some(error)
    }

    /// Pushes fresh snapshots to every listener on `collection` whose
    /// result set changed. Listeners whose receiver is gone are dropped.
    fn notify(&mut self, collection: &CollectionPath) {
        if !self.connected {
            return;
        }
        let mut pending = Vec::new();
        for (&id, entry) in self.listeners.iter() {
            if &entry.query.collection != collection {
                continue;
            }
            let snapshot = self.snapshot(&entry.query);
            if entry.last.as_ref().map(|s| &s.documents) != Some(&snapshot.documents) {
                pending.push((id, snapshot));
            }
        }

        for (id, snapshot) in pending {
            let Some(entry) = self.listeners.get_mut(&id) else {
                continue;
            };
            tracing::debug!(listener = id, collection = %collection, docs = snapshot.len(), "delivering snapshot");
            if entry.tx.send(Ok(snapshot.clone())).is_err() {
                self.listeners.remove(&id);
            } else {
                entry.last = Some(snapshot);
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// In-process document store with live queries.
///
/// Besides serving the engine in tests and the demo, it simulates the failure
/// modes the engine must survive: dropped connections, rejected writes,
/// random transport errors, latency, and writes held in flight.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    latency: Duration,
    failure_rate: f64,
    gate: Arc<watch::Sender<bool>>,
}

/// Keeps writes waiting until dropped.
pub struct WriteHold {
    gate: Arc<watch::Sender<bool>>,
}

impl Drop for WriteHold {
    fn drop(&mut self) {
        self.gate.send_replace(false);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            inner: Mutex::new(Inner {
                collections: HashMap::new(),
                listeners: HashMap::new(),
                next_listener: 1,
                next_seq: 0,
                version: 0,
                connected: true,
                faults: Vec::new(),
            }),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            gate: Arc::new(gate),
        }
    }

    /// Simulated round trip applied to every read and write.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Probability that any write fails with a transport error.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Fails the next `n` writes anywhere with `error`.
    pub fn fail_next_writes(&self, n: usize, error: SyncError) {
        if n == 0 {
            return;
        }
        self.inner.lock().faults.push(Fault {
            scope: FaultScope::Any,
            remaining: Some(n),
            error,
        });
    }

    /// Fails every write whose path starts with `prefix` until cleared.
    pub fn fail_writes_under(&self, prefix: impl Into<String>, error: SyncError) {
        self.inner.lock().faults.push(Fault {
            scope: FaultScope::Prefix(prefix.into()),
            remaining: None,
            error,
        });
    }

    /// Fails every write to exactly `path` until cleared. Documents nested
    /// under it are unaffected.
    pub fn fail_writes_at(&self, path: &DocPath, error: SyncError) {
        self.inner.lock().faults.push(Fault {
            scope: FaultScope::Exact(path.to_string()),
            remaining: None,
            error,
        });
    }

    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    /// Holds every write issued from now on until the guard is dropped.
    pub fn hold_writes(&self) -> WriteHold {
        self.gate.send_replace(true);
        WriteHold {
            gate: self.gate.clone(),
        }
    }

    /// Drops the connection: listeners get a transport error and writes fail.
    pub fn disconnect(&self) {
        let mut inner = self.inner.lock();
        inner.connected = false;
        inner.listeners.retain(|id, entry| {
            tracing::debug!(listener = id, "delivering transport error");
            entry
                .tx
                .send(Err(SyncError::Transport("connection lost".into())))
                .is_ok()
        });
    }

    /// Restores the connection and redelivers every listener's current result set.
    pub fn reconnect(&self) {
        let mut inner = self.inner.lock();
        inner.connected = true;
        let fresh: Vec<(ListenerId, Snapshot)> = inner
            .listeners
            .iter()
            .map(|(&id, entry)| (id, inner.snapshot(&entry.query)))
            .collect();
        for (id, snapshot) in fresh {
            if let Some(entry) = inner.listeners.get_mut(&id) {
                if entry.tx.send(Ok(snapshot.clone())).is_ok() {
                    entry.last = Some(snapshot);
                } else {
                    inner.listeners.remove(&id);
                }
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn document_count(&self, collection: &CollectionPath) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    async fn round_trip(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn begin_write(&self) {
        self.round_trip().await;
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this only ends when released.
        let _ = gate.wait_for(|held| !*held).await;
    }

    /// Runs the checks every write goes through, then `apply` under the lock.
    fn write<T>(
        &self,
        path: &str,
        apply: impl FnOnce(&mut Inner) -> Result<(T, CollectionPath)>,
    ) -> Result<T> {
        let mut inner = self.inner.lock();
        if !inner.connected {
            return Err(SyncError::Transport("not connected".into()));
        }
        if let Some(error) = inner.take_fault(path) {
            tracing::debug!(path, %error, "injected write failure");
            return Err(error);
        }
        if self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate {
            return Err(SyncError::Transport(format!("write to {path} dropped")));
        }
        let (out, touched) = apply(&mut *inner)?;
        inner.version += 1;
        inner.notify(&touched);
        Ok(out)
    }
}

fn as_object(path: &str, data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(SyncError::Validation(format!(
            "document {path} must be a JSON object"
        ))),
    }
}

fn set_field(data: &mut Map<String, Value>, field: &str, value: Value) {
    match field.split_once('.') {
        None => {
            data.insert(field.to_string(), value);
        }
        Some((head, rest)) => {
            let child = data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                set_field(map, rest, value);
            }
        }
    }
}

fn update_array(data: &mut Map<String, Value>, field: &str, f: impl FnOnce(&mut Vec<Value>)) {
    let mut items = match data.remove(field) {
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    };
    f(&mut items);
    data.insert(field.to_string(), Value::Array(items));
}

fn apply_op(data: &mut Map<String, Value>, op: FieldOp) {
    match op {
        FieldOp::Set(field, value) => set_field(data, &field, value),
        FieldOp::ArrayUnion(field, values) => update_array(data, &field, |items| {
            for v in values {
                if !items.contains(&v) {
                    items.push(v);
                }
            }
        }),
        FieldOp::ArrayRemove(field, values) => {
            update_array(data, &field, |items| items.retain(|v| !values.contains(v)))
        }
        FieldOp::Increment(field, by) => {
            let next = match data.get(&field) {
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(i) => Value::Number(Number::from(i.saturating_add(by))),
                    None => Number::from_f64(n.as_f64().unwrap_or(0.0) + by as f64)
                        .map(Value::Number)
                        .unwrap_or(Value::Null),
                },
                _ => Value::Number(Number::from(by)),
            };
            data.insert(field, next);
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
        self.round_trip().await;
        let inner = self.inner.lock();
        if !inner.connected {
            return Err(SyncError::Transport("not connected".into()));
        }
        Ok(inner
            .collections
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|d| Document {
                id: path.id.clone(),
                data: d.data.clone(),
            }))
    }

    async fn query(&self, query: &Query) -> Result<Snapshot> {
        self.round_trip().await;
        let inner = self.inner.lock();
        if !inner.connected {
            return Err(SyncError::Transport("not connected".into()));
        }
        Ok(inner.snapshot(query))
    }

    async fn set(&self, path: &DocPath, data: Value) -> Result<()> {
        self.begin_write().await;
        let key = path.to_string();
        let data = as_object(&key, data)?;
        self.write(&key, |inner| {
            let seq = inner.next_seq();
            let docs = inner.collections.entry(path.collection.clone()).or_default();
            match docs.get_mut(&path.id) {
                Some(existing) => existing.data = data,
                None => {
                    docs.insert(path.id.clone(), StoredDoc { data, seq });
                }
            }
            Ok(((), path.collection.clone()))
        })
    }

    async fn update(&self, path: &DocPath, ops: Vec<FieldOp>) -> Result<()> {
        self.begin_write().await;
        let key = path.to_string();
        self.write(&key, |inner| {
            let doc = inner
                .collections
                .get_mut(&path.collection)
                .and_then(|docs| docs.get_mut(&path.id))
                .ok_or_else(|| SyncError::not_found(&key))?;
            for op in ops {
                apply_op(&mut doc.data, op);
            }
            Ok(((), path.collection.clone()))
        })
    }

    async fn add(&self, collection: &CollectionPath, data: Value) -> Result<String> {
        self.begin_write().await;
        let id = nanoid::nanoid!(20);
        let key = collection.doc(id.clone()).to_string();
        let data = as_object(&key, data)?;
        self.write(&key, |inner| {
            let seq = inner.next_seq();
            inner
                .collections
                .entry(collection.clone())
                .or_default()
                .insert(id.clone(), StoredDoc { data, seq });
            Ok((id, collection.clone()))
        })
    }

    async fn delete(&self, path: &DocPath) -> Result<()> {
        self.begin_write().await;
        let key = path.to_string();
        self.write(&key, |inner| {
            if let Some(docs) = inner.collections.get_mut(&path.collection) {
                docs.remove(&path.id);
            }
            Ok(((), path.collection.clone()))
        })
    }

    fn listen(&self, query: Query) -> Listener {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        let id = inner.next_listener;
        inner.next_listener += 1;

        let (initial, last) = if inner.connected {
            let snapshot = inner.snapshot(&query);
            (Ok(snapshot.clone()), Some(snapshot))
        } else {
            (Err(SyncError::Transport("not connected".into())), None)
        };
        let _ = tx.send(initial);

        tracing::debug!(listener = id, collection = %query.collection, "listener attached");
        inner.listeners.insert(id, ListenerEntry { query, tx, last });
        Listener { id, rx }
    }

    fn unlisten(&self, id: ListenerId) {
        if self.inner.lock().listeners.remove(&id).is_some() {
            tracing::debug!(listener = id, "listener detached");
        }
    }

    fn version(&self) -> u64 {
        self.inner.lock().version
    }
}
