use std::collections::{BTreeSet, HashSet};

use chrono::Utc;
use regex_lite::Regex;
use url::Url;

use reel_shared::constants::MAX_TAG_LENGTH;
use reel_shared::validation::{validate_summary, validate_tag_count, validate_title};

use crate::error::{Result, SyncError};
use crate::models::{paths, NewPost, Post};
use crate::session::Session;
use crate::store::{to_document_data, DocumentStore};

fn validate_link(field: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|e| SyncError::Validation(format!("{field} is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(SyncError::Validation(format!(
            "{field} must be an http(s) URL, got {other}"
        ))),
    }
}

/// Lowercases tags, strips a leading `#`, drops blanks and duplicates while
/// keeping the original order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>> {
    let pattern = Regex::new(r"^[a-z0-9_-]+$")
        .map_err(|e| SyncError::Validation(format!("tag pattern: {e}")))?;
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for raw in tags {
        let tag = raw.trim().trim_start_matches('#').to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_LENGTH || !pattern.is_match(&tag) {
            return Err(SyncError::Validation(format!("invalid tag: {raw}")));
        }
        if seen.insert(tag.clone()) {
            out.push(tag);
        }
    }
    validate_tag_count(out.len())?;
    Ok(out)
}

/// Stores a new post for the signed-in user and returns its id.
///
/// Posts start visible, unliked and without comments.
pub async fn publish_post(store: &dyn DocumentStore, session: &Session, new: NewPost) -> Result<String> {
    validate_title(&new.title)?;
    validate_summary(&new.summary)?;
    validate_link("media URL", &new.media_url)?;
    if !new.thumbnail_url.is_empty() {
        validate_link("thumbnail URL", &new.thumbnail_url)?;
    }
    if !new.external_link.is_empty() {
        validate_link("external link", &new.external_link)?;
    }
    let tags = normalize_tags(&new.tags)?;

    let post = Post {
        id: String::new(),
        owner_id: session.uid.clone(),
        media_url: new.media_url,
        thumbnail_url: new.thumbnail_url,
        title: new.title.trim().to_string(),
        summary: new.summary,
        external_link: new.external_link,
        tags,
        likes: BTreeSet::new(),
        comment_count: 0,
        created_at: Utc::now(),
        author: Some(session.author()),
        visible: true,
    };
    let id = store.add(&paths::posts(), to_document_data(&post)?).await?;
    tracing::info!(post = %id, owner = %session.uid, "post published");
    Ok(id)
}
