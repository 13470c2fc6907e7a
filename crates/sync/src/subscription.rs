//! Live query lifecycle.
//!
//! Every delivery is the full ordered result set, so consumers replace their
//! view state wholesale. A `SubscriptionHandle` must be released on teardown
//! or whenever the query parameters change; dropping it releases it too.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::error::SyncError;
use crate::store::{DocumentStore, ListenerId, Query, Snapshot};

pub type SubscriptionId = u64;

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    active: Arc<Mutex<HashMap<SubscriptionId, String>>>,
    next_id: Arc<AtomicU64>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Opens a live query. Transport errors are logged and otherwise ignored;
    /// the store redelivers once the connection comes back.
    pub fn subscribe<F>(&self, query: Query, on_snapshot: F) -> SubscriptionHandle
    where
        F: FnMut(Snapshot) + Send + 'static,
    {
        self.subscribe_with_errors(query, on_snapshot, |_| {})
    }

    pub fn subscribe_with_errors<F, E>(
        &self,
        query: Query,
        mut on_snapshot: F,
        mut on_error: E,
    ) -> SubscriptionHandle
    where
        F: FnMut(Snapshot) + Send + 'static,
        E: FnMut(SyncError) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = query.collection.to_string();
        let mut listener = self.store.listen(query);
        let closed = Arc::new(AtomicBool::new(false));

        let task = {
            let closed = closed.clone();
            let label = label.clone();
            tokio::spawn(async move {
                while let Some(delivery) = listener.rx.recv().await {
                    if closed.load(Ordering::Acquire) {
                        break;
                    }
                    match delivery {
                        Ok(snapshot) => {
                            tracing::debug!(subscription = id, collection = %label, docs = snapshot.len(), "snapshot");
                            on_snapshot(snapshot);
                        }
                        Err(e) => {
                            tracing::warn!(subscription = id, collection = %label, error = %e, "listener error");
                            on_error(e);
                        }
                    }
                }
            })
        };

        self.active.lock().insert(id, label);

        SubscriptionHandle {
            id,
            listener: listener.id,
            store: self.store.clone(),
            registry: self.active.clone(),
            closed,
            task: Mutex::new(Some(task)),
        }
    }

    /// Number of subscriptions not yet released.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Collections of the subscriptions not yet released.
    pub fn active_collections(&self) -> Vec<String> {
        let mut labels: Vec<String> = self.active.lock().values().cloned().collect();
        labels.sort();
        labels
    }
}

pub struct SubscriptionHandle {
    id: SubscriptionId,
    listener: ListenerId,
    store: Arc<dyn DocumentStore>,
    registry: Arc<Mutex<HashMap<SubscriptionId, String>>>,
    closed: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    /// Stops all further deliveries. Safe to call more than once.
    pub fn unsubscribe(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.store.unlisten(self.listener);
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.registry.lock().remove(&self.id);
        tracing::debug!(subscription = self.id, "unsubscribed");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
