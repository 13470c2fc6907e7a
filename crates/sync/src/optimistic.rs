//! Two-phase optimistic mutations.
//!
//! 1. Local phase: the new value is computed from the current one and handed
//!    back to the caller at once.
//! 2. Remote phase: the write is issued in the background, built from the
//!    pre-mutation value.
//! 3. Reconciliation: success leaves the value in place until a snapshot
//!    that includes the write arrives; failure inverts the local change and
//!    is reported.
//!
//! Remote phases aimed at the same target are written in the order their
//! local phases ran. Failed mutations are never resubmitted automatically.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Pending,
    /// Acknowledged; visible in snapshots from this store version on.
    Confirmed(u64),
}

#[derive(Debug, Clone)]
struct Entry<V> {
    seq: u64,
    before: V,
    after: V,
    status: Status,
}

/// Identifies one local change so its remote outcome can be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticket<K, V> {
    pub key: K,
    pub seq: u64,
    pub before: V,
    pub after: V,
}

/// Locally asserted values layered over remote state, per key.
///
/// Each key keeps the chain of changes not yet superseded by a snapshot; the
/// displayed value is the newest change's result. Rolling back a change that
/// a newer one already built on rewrites the newer change's base instead of
/// flipping what the user sees.
///
/// A chain is only dropped by a snapshot at or past the version of its last
/// acknowledged write, so snapshots queued before the write landed never
/// flash the old value.
#[derive(Debug)]
pub struct OptimisticLedger<K, V> {
    chains: HashMap<K, Vec<Entry<V>>>,
    next_seq: u64,
}

impl<K, V> Default for OptimisticLedger<K, V> {
    fn default() -> Self {
        Self {
            chains: HashMap::new(),
            next_seq: 1,
        }
    }
}

impl<K, V> OptimisticLedger<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// The locally asserted value, if any change for `key` is outstanding.
    pub fn value(&self, key: &K) -> Option<&V> {
        self.chains
            .get(key)
            .and_then(|chain| chain.last())
            .map(|e| &e.after)
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.chains
            .get(key)
            .is_some_and(|chain| chain.iter().any(|e| e.status == Status::Pending))
    }

    pub fn has_changes(&self, key: &K) -> bool {
        self.chains.contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.chains
            .values()
            .flatten()
            .filter(|e| e.status == Status::Pending)
            .count()
    }

    /// Local phase: records `transition(current)` as the new value for `key`.
    pub fn begin(&mut self, key: K, current: V, transition: impl FnOnce(&V) -> V) -> Ticket<K, V> {
        let after = transition(&current);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.chains.entry(key.clone()).or_default().push(Entry {
            seq,
            before: current.clone(),
            after: after.clone(),
            status: Status::Pending,
        });
        Ticket {
            key,
            seq,
            before: current,
            after,
        }
    }

    /// Marks a change acknowledged by the store at `version`.
    pub fn confirm(&mut self, key: &K, seq: u64, version: u64) {
        if let Some(entry) = self
            .chains
            .get_mut(key)
            .and_then(|chain| chain.iter_mut().find(|e| e.seq == seq))
        {
            entry.status = Status::Confirmed(version);
        }
    }

    /// Inverts one change. Returns the value now asserted for `key`, or
    /// `None` when the remote value shows through again.
    pub fn roll_back(&mut self, key: &K, seq: u64) -> Option<V> {
        let chain = self.chains.get_mut(key)?;
        let idx = chain.iter().position(|e| e.seq == seq)?;
        let removed = chain.remove(idx);
        if let Some(next) = chain.get_mut(idx) {
            next.before = removed.before;
        }
        if chain.is_empty() {
            self.chains.remove(key);
            return None;
        }
        chain.last().map(|e| e.after.clone())
    }

    /// A snapshot read at `version` arrived: drops every chain whose writes
    /// were all acknowledged at or before it. From here on the remote value
    /// is authoritative for those keys.
    pub fn settle(&mut self, version: u64) {
        self.chains.retain(|_, chain| {
            !chain.iter().all(|e| match e.status {
                Status::Confirmed(at) => at <= version,
                Status::Pending => false,
            })
        });
    }
}

/// A failed mutation, surfaced for a transient user-visible error.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationFailure {
    pub operation: &'static str,
    pub target: String,
    pub error: SyncError,
}

/// Resolves once the remote phase finished and reconciliation ran.
pub struct PendingMutation {
    rx: oneshot::Receiver<Result<()>>,
}

impl PendingMutation {
    pub async fn outcome(self) -> Result<()> {
        self.rx.await.unwrap_or(Err(SyncError::Closed))
    }
}

/// Result of the local phase: the value to render now, and the remote phase.
pub struct Applied<V> {
    pub value: V,
    pub remote: PendingMutation,
}

/// Last remote phase queued for a target.
struct QueueTail {
    seq: u64,
    done: oneshot::Receiver<()>,
}

#[derive(Default)]
struct Queues {
    tails: HashMap<String, QueueTail>,
    next_seq: u64,
}

/// Runs remote phases in the background and reconciles their outcome.
///
/// Phases for one target form a queue: each waits for its predecessor to
/// finish, so a like followed by an unlike can never reach the store as
/// unlike-then-like.
#[derive(Clone)]
pub struct MutationController {
    failures: mpsc::UnboundedSender<MutationFailure>,
    queues: Arc<Mutex<Queues>>,
}

impl MutationController {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MutationFailure>) {
        let (failures, rx) = mpsc::unbounded_channel();
        let controller = Self {
            failures,
            queues: Arc::new(Mutex::new(Queues::default())),
        };
        (controller, rx)
    }

    /// Targets that still have a remote phase queued or running.
    pub fn queued_targets(&self) -> usize {
        self.queues.lock().tails.len()
    }

    /// Issues `remote` once every phase previously dispatched for `target`
    /// has finished. On success `on_success` gets its output; on any
    /// failure `on_failure` undoes the local phase before the failure is
    /// published.
    pub fn dispatch<T, Fut, S, F>(
        &self,
        operation: &'static str,
        target: String,
        remote: Fut,
        on_success: S,
        on_failure: F,
    ) -> PendingMutation
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(&SyncError) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        let (seq, previous) = {
            let mut queues = self.queues.lock();
            queues.next_seq += 1;
            let seq = queues.next_seq;
            let previous = queues
                .tails
                .insert(target.clone(), QueueTail { seq, done: done_rx })
                .map(|tail| tail.done);
            (seq, previous)
        };
        let failures = self.failures.clone();
        let queues = self.queues.clone();
        let key = target.clone();
        tokio::spawn(async move {
            if let Some(previous) = previous {
                tracing::debug!(operation, target = %key, "waiting for earlier mutation");
                // A dropped sender still means the earlier phase is over.
                let _ = previous.await;
            }
            let result = match remote.await {
                Ok(output) => {
                    tracing::debug!(operation, target = %target, "mutation confirmed");
                    on_success(output);
                    Ok(())
                }
                Err(error) => {
                    tracing::warn!(operation, target = %target, %error, "mutation failed, rolling back");
                    on_failure(&error);
                    let _ = failures.send(MutationFailure {
                        operation,
                        target,
                        error: error.clone(),
                    });
                    Err(error)
                }
            };
            {
                let mut queues = queues.lock();
                if queues.tails.get(&key).is_some_and(|tail| tail.seq == seq) {
                    queues.tails.remove(&key);
                }
            }
            let _ = done_tx.send(());
            let _ = tx.send(result);
        });
        PendingMutation { rx }
    }
}

/// Like state as rendered for one post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LikeState {
    pub liked: bool,
    pub count: u64,
}

impl LikeState {
    /// Combines the remote liker set with a locally asserted membership.
    /// The count follows membership, so other users' concurrent likes
    /// still show through while our own change is in flight.
    pub fn derive(remote_liked: bool, remote_count: u64, asserted: Option<bool>) -> Self {
        match asserted {
            Some(liked) if liked != remote_liked => Self {
                liked,
                count: if liked {
                    remote_count + 1
                } else {
                    remote_count.saturating_sub(1)
                },
            },
            _ => Self {
                liked: remote_liked,
                count: remote_count,
            },
        }
    }

    pub fn toggled(self) -> Self {
        Self {
            liked: !self.liked,
            count: if self.liked {
                self.count.saturating_sub(1)
            } else {
                self.count + 1
            },
        }
    }
}

/// Whether a double activation should like the post: it only ever likes,
/// it never unlikes.
pub fn double_activation_likes(currently_liked: bool) -> bool {
    !currently_liked
}

/// Detects two activations within a short window.
#[derive(Debug, Clone)]
pub struct DoubleTapDetector {
    window: Duration,
    last: Option<Instant>,
}

impl DoubleTapDetector {
    pub fn new(window: Duration) -> Self {
        Self { window, last: None }
    }

    /// Registers a tap; returns true when it completes a double tap.
    pub fn tap(&mut self, at: Instant) -> bool {
        match self.last {
            Some(prev) if at.saturating_duration_since(prev) <= self.window => {
                self.last = None;
                true
            }
            _ => {
                self.last = Some(at);
                false
            }
        }
    }
}

/// Message input buffer. Sending clears it at once; a failed send puts the
/// text back in front of whatever was typed since.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Composer {
    buffer: String,
}

impl Composer {
    pub fn text(&self) -> &str {
        &self.buffer
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.buffer = text.into();
    }

    pub fn push_str(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Local phase of a send: takes the buffer if it has anything to send.
    pub fn take(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    pub fn restore(&mut self, unsent: &str) {
        self.buffer.insert_str(0, unsent);
    }
}
