use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use reel_shared::constants::UNKNOWN_DISPLAY_NAME;

use crate::models::{fields, paths, ChatRoom, UserProfile};
use crate::session::{ProfileCache, Session};
use crate::store::{Direction, Filter, Query};
use crate::subscription::{SubscriptionHandle, SubscriptionManager};

/// Rooms the user takes part in, most recently active first.
pub fn inbox_query(uid: &str) -> Query {
    Query::new(paths::chats(), fields::UPDATED_AT, Direction::Descending)
        .filter(Filter::ArrayContains(fields::PARTICIPANTS.into(), json!(uid)))
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub room: ChatRoom,
    pub other_uid: Option<String>,
    /// `None` until the profile has been fetched.
    pub other: Option<UserProfile>,
}

impl InboxEntry {
    pub fn display_name(&self) -> &str {
        self.other
            .as_ref()
            .map(|p| p.display_name.as_str())
            .unwrap_or(UNKNOWN_DISPLAY_NAME)
    }
}

/// Live room list. Each snapshot kicks off profile hydration for the other
/// participants; entries pick the profiles up whenever they are cached.
pub struct Inbox {
    uid: String,
    rooms: Arc<Mutex<Vec<ChatRoom>>>,
    profiles: ProfileCache,
    subscription: Option<SubscriptionHandle>,
}

impl Inbox {
    pub fn open(subs: &SubscriptionManager, session: &Session, profiles: ProfileCache) -> Self {
        let rooms = Arc::new(Mutex::new(Vec::new()));
        let subscription = {
            let rooms = rooms.clone();
            let profiles = profiles.clone();
            let uid = session.uid.clone();
            subs.subscribe(inbox_query(&session.uid), move |snapshot| {
                let list: Vec<ChatRoom> = match snapshot.decode() {
                    Ok(list) => list,
                    Err(e) => {
                        tracing::warn!(uid = %uid, error = %e, "dropping undecodable inbox snapshot");
                        return;
                    }
                };
                let others: Vec<String> = list
                    .iter()
                    .filter_map(|room| room.other_participant(&uid).map(str::to_string))
                    .collect();
                *rooms.lock() = list;
                profiles.hydrate(others);
            })
        };

        Self {
            uid: session.uid.clone(),
            rooms,
            profiles,
            subscription: Some(subscription),
        }
    }

    pub fn rooms(&self) -> Vec<ChatRoom> {
        self.rooms.lock().clone()
    }

    pub fn entries(&self) -> Vec<InboxEntry> {
        self.rooms
            .lock()
            .iter()
            .map(|room| {
                let other_uid = room.other_participant(&self.uid).map(str::to_string);
                let other = other_uid.as_deref().and_then(|uid| self.profiles.get(uid));
                InboxEntry {
                    room: room.clone(),
                    other_uid,
                    other,
                }
            })
            .collect()
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }
    }

    pub fn is_open(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.close();
    }
}
