//! The scrolling feed: live posts, which one plays, and per-post like state.

mod comments;
mod posts;

pub use comments::{add_comment, CommentThread};
pub use posts::{normalize_tags, publish_post};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{fields, paths, Post};
use crate::optimistic::{
    double_activation_likes, Applied, DoubleTapDetector, LikeState, MutationController,
    MutationFailure, OptimisticLedger,
};
use crate::session::Session;
use crate::store::{Direction, DocumentStore, FieldOp, Filter, Query, Snapshot};
use crate::subscription::{SubscriptionHandle, SubscriptionManager};
use crate::viewport::{IntersectionEntry, Layout, Playback, PlaybackCommand, ViewportTracker};

/// Posts shown in the feed: visible ones, newest first, no page limit.
pub fn feed_query() -> Query {
    Query::new(paths::posts(), fields::CREATED_AT, Direction::Descending)
        .filter(Filter::Eq(fields::VISIBLE.into(), json!(true)))
}

/// Set-membership write for a like toggle, built from the value *before*
/// the toggle: a liked post gets the user removed, an unliked one added.
pub fn like_write(uid: &str, was_liked: bool) -> FieldOp {
    let member = vec![json!(uid)];
    if was_liked {
        FieldOp::ArrayRemove(fields::LIKES.into(), member)
    } else {
        FieldOp::ArrayUnion(fields::LIKES.into(), member)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub post: Post,
    pub liked: bool,
    pub like_count: u64,
    pub active: bool,
    pub playback: Playback,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedView {
    pub items: Vec<FeedItem>,
    pub active_index: Option<usize>,
    /// False until the first snapshot arrived.
    pub loaded: bool,
}

struct FeedState {
    posts: Vec<Post>,
    loaded: bool,
    /// Store version of the snapshot currently shown.
    version: u64,
    tracker: ViewportTracker,
    likes: OptimisticLedger<String, bool>,
    taps: HashMap<String, DoubleTapDetector>,
    commands: Vec<PlaybackCommand>,
}

impl FeedState {
    fn post(&self, post_id: &str) -> Option<&Post> {
        self.posts.iter().find(|p| p.id == post_id)
    }

    fn like_state(&self, post: &Post, uid: &str) -> LikeState {
        LikeState::derive(
            post.is_liked_by(uid),
            post.like_count(),
            self.likes.value(&post.id).copied(),
        )
    }

    fn replace(&mut self, posts: Vec<Post>, version: u64) {
        let ids = posts.iter().map(|p| p.id.clone()).collect();
        self.posts = posts;
        self.loaded = true;
        self.version = version;
        self.likes.settle(version);
        let posts = &self.posts;
        self.taps.retain(|id, _| posts.iter().any(|p| &p.id == id));
        let commands = self.tracker.rearm(ids);
        self.commands.extend(commands);
    }
}

pub struct FeedAggregate {
    session: Session,
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<FeedState>>,
    controller: MutationController,
    failures: Option<mpsc::UnboundedReceiver<MutationFailure>>,
    subscription: Option<SubscriptionHandle>,
    double_tap_window: Duration,
}

impl FeedAggregate {
    /// Subscribes to the feed. Every snapshot replaces the item list and
    /// re-arms the viewport tracker against it.
    pub fn mount(subs: &SubscriptionManager, session: Session, config: &Config) -> Self {
        let state = Arc::new(Mutex::new(FeedState {
            posts: Vec::new(),
            loaded: false,
            version: 0,
            tracker: ViewportTracker::new(config.active_threshold),
            likes: OptimisticLedger::new(),
            taps: HashMap::new(),
            commands: Vec::new(),
        }));
        let (controller, failures) = MutationController::new();

        let subscription = {
            let state = state.clone();
            subs.subscribe(feed_query(), move |snapshot: Snapshot| {
                let posts = decode_posts(&snapshot);
                state.lock().replace(posts, snapshot.version);
            })
        };
        tracing::info!(uid = %session.uid, "feed mounted");

        Self {
            session,
            store: subs.store().clone(),
            state,
            controller,
            failures: Some(failures),
            subscription: Some(subscription),
            double_tap_window: config.double_tap_window(),
        }
    }

    /// Releases the live query. The aggregate keeps its last view.
    pub fn unmount(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
            tracing::info!(uid = %self.session.uid, "feed unmounted");
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.subscription.is_some()
    }

    /// Receiver for rolled-back mutations; can be taken once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<MutationFailure>> {
        self.failures.take()
    }

    pub fn view(&self) -> FeedView {
        let state = self.state.lock();
        let active_index = state.tracker.active_index();
        let items = state
            .posts
            .iter()
            .enumerate()
            .map(|(index, post)| {
                let likes = state.like_state(post, &self.session.uid);
                FeedItem {
                    post: post.clone(),
                    liked: likes.liked,
                    like_count: likes.count,
                    active: active_index == Some(index),
                    playback: state.tracker.playback(&post.id).unwrap_or_default(),
                }
            })
            .collect();
        FeedView {
            items,
            active_index,
            loaded: state.loaded,
        }
    }

    pub fn like_state(&self, post_id: &str) -> Option<LikeState> {
        let state = self.state.lock();
        state
            .post(post_id)
            .map(|post| state.like_state(post, &self.session.uid))
    }

    /// Flips the current user's like on a post. The returned state is what
    /// the UI should render right away; the store write runs in the
    /// background and is undone if it fails.
    pub fn toggle_like(&self, post_id: &str) -> Result<Applied<LikeState>> {
        let uid = self.session.uid.clone();
        let (ticket, value) = {
            let mut state = self.state.lock();
            let post = state
                .post(post_id)
                .ok_or_else(|| SyncError::not_found(paths::post(post_id)))?;
            let (remote_liked, remote_count) = (post.is_liked_by(&uid), post.like_count());
            let current = state
                .likes
                .value(&post_id.to_string())
                .copied()
                .unwrap_or(remote_liked);
            let ticket = state.likes.begin(post_id.to_string(), current, |liked| !liked);
            let value = LikeState::derive(remote_liked, remote_count, Some(ticket.after));
            (ticket, value)
        };
        tracing::debug!(post = %post_id, liked = value.liked, count = value.count, "like toggled locally");

        let remote = {
            let store = self.store.clone();
            let path = paths::post(post_id);
            let op = like_write(&uid, ticket.before);
            async move {
                store
                    .update(&path, vec![op])
                    .await
                    .map(|()| store.version())
            }
        };
        let on_success = {
            let state = self.state.clone();
            let (key, seq) = (ticket.key.clone(), ticket.seq);
            move |version: u64| {
                let mut state = state.lock();
                state.likes.confirm(&key, seq, version);
                // The snapshot carrying the write may already be on screen.
                let shown = state.version;
                state.likes.settle(shown);
            }
        };
        let on_failure = {
            let state = self.state.clone();
            let (key, seq) = (ticket.key, ticket.seq);
            move |_: &SyncError| {
                state.lock().likes.roll_back(&key, seq);
            }
        };

        let remote = self.controller.dispatch(
            "toggle_like",
            post_id.to_string(),
            remote,
            on_success,
            on_failure,
        );
        Ok(Applied { value, remote })
    }

    /// Double activation only ever likes. Returns `None` when the post was
    /// already liked and nothing changed.
    pub fn double_activate(&self, post_id: &str) -> Result<Option<Applied<LikeState>>> {
        let liked = self
            .like_state(post_id)
            .ok_or_else(|| SyncError::not_found(paths::post(post_id)))?
            .liked;
        if !double_activation_likes(liked) {
            return Ok(None);
        }
        self.toggle_like(post_id).map(Some)
    }

    /// Single activation on a post's media. Two of them within the
    /// double-tap window act as a double activation.
    pub fn tap(&self, post_id: &str, at: Instant) -> Result<Option<Applied<LikeState>>> {
        let double = {
            let mut state = self.state.lock();
            if state.post(post_id).is_none() {
                return Err(SyncError::not_found(paths::post(post_id)));
            }
            let window = self.double_tap_window;
            state
                .taps
                .entry(post_id.to_string())
                .or_insert_with(|| DoubleTapDetector::new(window))
                .tap(at)
        };
        if double {
            self.double_activate(post_id)
        } else {
            Ok(None)
        }
    }

    pub fn set_layout(&self, layout: Layout) -> Vec<PlaybackCommand> {
        self.state.lock().tracker.set_layout(layout)
    }

    pub fn scroll_to(&self, offset: f64) -> Vec<PlaybackCommand> {
        self.state.lock().tracker.scroll_to(offset)
    }

    pub fn report_intersections(&self, entries: &[IntersectionEntry]) -> Vec<PlaybackCommand> {
        self.state.lock().tracker.report(entries)
    }

    pub fn advance_playback(&self, elapsed: Duration) {
        self.state.lock().tracker.advance(elapsed);
    }

    /// Playback changes caused by snapshots re-arming the tracker.
    pub fn take_playback_commands(&self) -> Vec<PlaybackCommand> {
        std::mem::take(&mut self.state.lock().commands)
    }

    pub fn active_post_id(&self) -> Option<String> {
        self.state.lock().tracker.active_id().map(str::to_string)
    }

    pub fn observed_count(&self) -> usize {
        self.state.lock().tracker.observed_count()
    }

    pub fn pending_likes(&self) -> usize {
        self.state.lock().likes.pending_count()
    }
}

impl Drop for FeedAggregate {
    fn drop(&mut self) {
        self.unmount();
    }
}

/// Decodes a feed snapshot, skipping documents that don't fit the model.
fn decode_posts(snapshot: &Snapshot) -> Vec<Post> {
    snapshot
        .documents
        .iter()
        .filter_map(|doc| match doc.decode::<Post>() {
            Ok(post) => Some(post),
            Err(e) => {
                tracing::warn!(post = %doc.id, error = %e, "skipping malformed post");
                None
            }
        })
        .collect()
}
