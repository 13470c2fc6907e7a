use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Author;

fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub media_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub external_link: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Liker ids; membership is the source of truth for the like count.
    #[serde(default)]
    pub likes: BTreeSet<String>,
    /// Maintained by increments, independently of the comments subcollection.
    #[serde(default)]
    pub comment_count: u64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author: Option<Author>,
    #[serde(default = "default_visible")]
    pub visible: bool,
}

impl Post {
    pub fn is_liked_by(&self, uid: &str) -> bool {
        self.likes.contains(uid)
    }

    pub fn like_count(&self) -> u64 {
        self.likes.len() as u64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub text: String,
    pub author: Author,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// Fields supplied by the upload flow when publishing.
#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub media_url: String,
    pub thumbnail_url: String,
    pub title: String,
    pub summary: String,
    pub external_link: String,
    pub tags: Vec<String>,
}
