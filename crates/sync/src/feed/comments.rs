use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use reel_shared::validation::validate_comment_text;

use crate::error::Result;
use crate::models::{fields, paths, Comment};
use crate::session::Session;
use crate::store::{to_document_data, Direction, DocumentStore, FieldOp, Query};
use crate::subscription::{SubscriptionHandle, SubscriptionManager};

pub fn comments_query(post_id: &str) -> Query {
    Query::new(paths::comments(post_id), fields::CREATED_AT, Direction::Ascending)
}

/// Live comments of one post, opened while the comment drawer is.
pub struct CommentThread {
    subs: SubscriptionManager,
    post_id: Option<String>,
    comments: Arc<Mutex<Vec<Comment>>>,
    subscription: Option<SubscriptionHandle>,
}

impl CommentThread {
    pub fn new(subs: SubscriptionManager) -> Self {
        Self {
            subs,
            post_id: None,
            comments: Arc::new(Mutex::new(Vec::new())),
            subscription: None,
        }
    }

    /// Shows the comments of `post_id`, releasing the previous post's listener.
    pub fn open(&mut self, post_id: &str) {
        if self.post_id.as_deref() == Some(post_id) && self.subscription.is_some() {
            return;
        }
        self.close();

        let comments = self.comments.clone();
        let handle = self.subs.subscribe(comments_query(post_id), move |snapshot| {
            match snapshot.decode::<Comment>() {
                Ok(list) => *comments.lock() = list,
                Err(e) => tracing::warn!(error = %e, "dropping undecodable comments snapshot"),
            }
        });
        self.post_id = Some(post_id.to_string());
        self.subscription = Some(handle);
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }
        self.post_id = None;
        self.comments.lock().clear();
    }

    pub fn post_id(&self) -> Option<&str> {
        self.post_id.as_deref()
    }

    pub fn comments(&self) -> Vec<Comment> {
        self.comments.lock().clone()
    }
}

/// Appends a comment, then bumps the post's comment counter.
///
/// The counter is a separate commutative increment. If it fails after the
/// comment was stored, the comment still counts as posted and the miss is
/// logged.
pub async fn add_comment(
    store: &dyn DocumentStore,
    session: &Session,
    post_id: &str,
    text: &str,
) -> Result<String> {
    validate_comment_text(text)?;

    let comment = Comment {
        id: String::new(),
        post_id: post_id.to_string(),
        text: text.trim().to_string(),
        author: session.author(),
        created_at: Utc::now(),
    };
    let id = store
        .add(&paths::comments(post_id), to_document_data(&comment)?)
        .await?;

    let bump = vec![FieldOp::Increment(fields::COMMENT_COUNT.into(), 1)];
    if let Err(e) = store.update(&paths::post(post_id), bump).await {
        tracing::warn!(post = %post_id, comment = %id, error = %e, "comment stored but counter not bumped");
    }
    Ok(id)
}
