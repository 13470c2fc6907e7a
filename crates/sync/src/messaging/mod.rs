//! Direct messages between two users.
//!
//! A room's id is derived from its two participants, so both sides agree on
//! it without asking the store and a pair can never end up with two rooms.

mod inbox;
mod thread;

pub use inbox::{inbox_query, Inbox, InboxEntry};
pub use thread::{messages_query, ChatThread};

use chrono::Utc;
use serde_json::json;

use reel_shared::constants::ROOM_ID_SEPARATOR;
use reel_shared::validation::{validate_message_text, validate_user_id};

use crate::error::{Result, SyncError};
use crate::models::{fields, paths, ChatRoom, LastMessage, Message};
use crate::session::Session;
use crate::store::{to_document_data, DocumentStore, FieldOp};

/// Sorted participant ids joined by the separator. Order of the arguments
/// does not matter.
pub fn room_id(a: &str, b: &str) -> Result<String> {
    validate_user_id(a)?;
    validate_user_id(b)?;
    if a == b {
        return Err(SyncError::Validation(
            "a chat needs two different participants".into(),
        ));
    }
    let (low, high) = if a < b { (a, b) } else { (b, a) };
    Ok(format!("{low}{ROOM_ID_SEPARATOR}{high}"))
}

/// The two participants encoded in a room id.
pub fn participants(room_id: &str) -> Option<(&str, &str)> {
    let (a, b) = room_id.split_once(ROOM_ID_SEPARATOR)?;
    (!a.is_empty() && !b.is_empty() && !b.contains(ROOM_ID_SEPARATOR)).then_some((a, b))
}

/// Returns the room for the pair, creating an empty one if none exists yet.
///
/// Concurrent first calls from both participants all write the same id, so
/// the last empty document written wins and there is still one room.
pub async fn get_or_create_room(store: &dyn DocumentStore, a: &str, b: &str) -> Result<ChatRoom> {
    let id = room_id(a, b)?;
    let path = paths::chat(&id);

    if let Some(doc) = store.get(&path).await? {
        return doc.decode();
    }

    let mut participants = vec![a.to_string(), b.to_string()];
    participants.sort();
    let room = ChatRoom {
        id: id.clone(),
        participants,
        last_message: None,
        updated_at: Utc::now(),
    };
    store.set(&path, to_document_data(&room)?).await?;
    tracing::info!(room = %id, "chat room created");
    Ok(room)
}

/// Appends a message to the room and refreshes the room's summary. The
/// room document is created first if this is the pair's first message.
///
/// The two writes are not atomic. When the message lands but the summary
/// update fails, the send still succeeds; the next message repairs the
/// summary.
pub async fn send_message(
    store: &dyn DocumentStore,
    session: &Session,
    room_id: &str,
    text: &str,
) -> Result<String> {
    validate_message_text(text)?;
    let (a, b) = match participants(room_id) {
        Some((a, b)) if a == session.uid || b == session.uid => (a, b),
        _ => {
            return Err(SyncError::PermissionDenied(format!(
                "{} is not a participant of {room_id}",
                session.uid
            )))
        }
    };
    get_or_create_room(store, a, b).await?;

    let message = Message {
        id: String::new(),
        room_id: room_id.to_string(),
        sender_id: session.uid.clone(),
        text: text.to_string(),
        created_at: Utc::now(),
    };
    let id = store
        .add(&paths::messages(room_id), to_document_data(&message)?)
        .await?;

    let summary = LastMessage {
        text: message.text,
        sender_id: message.sender_id,
        created_at: message.created_at,
        seen: false,
    };
    let ops = vec![
        FieldOp::Set(fields::LAST_MESSAGE.into(), to_document_data(&summary)?),
        FieldOp::Set(
            fields::UPDATED_AT.into(),
            json!(message.created_at.timestamp_micros()),
        ),
    ];
    if let Err(e) = store.update(&paths::chat(room_id), ops).await {
        tracing::warn!(room = %room_id, message = %id, error = %e, "message stored but room summary not updated");
    }
    Ok(id)
}
