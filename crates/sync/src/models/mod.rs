mod chat;
mod post;
mod user;

pub use chat::*;
pub use post::*;
pub use user::*;

use serde::{Deserialize, Serialize};

/// Denormalized author fields copied onto posts and comments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub uid: String,
    pub display_name: String,
    #[serde(default)]
    pub photo_url: Option<String>,
}

/// Stored field names used in queries and field operations.
pub mod fields {
    pub const CREATED_AT: &str = "createdAt";
    pub const UPDATED_AT: &str = "updatedAt";
    pub const LIKES: &str = "likes";
    pub const COMMENT_COUNT: &str = "commentCount";
    pub const VISIBLE: &str = "visible";
    pub const PARTICIPANTS: &str = "participants";
    pub const LAST_MESSAGE: &str = "lastMessage";
}

pub mod paths {
    use crate::store::{CollectionPath, DocPath};

    pub fn posts() -> CollectionPath {
        CollectionPath::new("posts")
    }

    pub fn post(id: &str) -> DocPath {
        posts().doc(id)
    }

    pub fn comments(post_id: &str) -> CollectionPath {
        post(post_id).child("comments")
    }

    pub fn chats() -> CollectionPath {
        CollectionPath::new("chats")
    }

    pub fn chat(room_id: &str) -> DocPath {
        chats().doc(room_id)
    }

    pub fn messages(room_id: &str) -> CollectionPath {
        chat(room_id).child("messages")
    }

    pub fn users() -> CollectionPath {
        CollectionPath::new("users")
    }

    pub fn user(uid: &str) -> DocPath {
        users().doc(uid)
    }
}
