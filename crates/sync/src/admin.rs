//! Moderation actions. Every call checks the session's admin flag before
//! touching the store.

use serde_json::json;

use crate::error::{Result, SyncError};
use crate::models::{fields, paths, Post};
use crate::session::Session;
use crate::store::{Direction, DocumentStore, FieldOp, Query};

fn require_admin(session: &Session, action: &str) -> Result<()> {
    if session.is_admin() {
        return Ok(());
    }
    tracing::warn!(uid = %session.uid, action, "admin action refused");
    Err(SyncError::PermissionDenied(format!(
        "{action} requires an admin account"
    )))
}

/// Every post, hidden ones included, newest first.
pub async fn list_all_posts(store: &dyn DocumentStore, session: &Session) -> Result<Vec<Post>> {
    require_admin(session, "list_all_posts")?;
    let query = Query::new(paths::posts(), fields::CREATED_AT, Direction::Descending);
    store.query(&query).await?.decode()
}

/// Removes the post document for good. Its comments are left in place.
pub async fn delete_post(store: &dyn DocumentStore, session: &Session, post_id: &str) -> Result<()> {
    require_admin(session, "delete_post")?;
    store.delete(&paths::post(post_id)).await?;
    tracing::info!(post = %post_id, by = %session.uid, "post deleted");
    Ok(())
}

/// Hides a post from the feed or shows it again.
pub async fn set_post_visibility(
    store: &dyn DocumentStore,
    session: &Session,
    post_id: &str,
    visible: bool,
) -> Result<()> {
    require_admin(session, "set_post_visibility")?;
    store
        .update(
            &paths::post(post_id),
            vec![FieldOp::Set(fields::VISIBLE.into(), json!(visible))],
        )
        .await?;
    tracing::info!(post = %post_id, visible, by = %session.uid, "post visibility changed");
    Ok(())
}
