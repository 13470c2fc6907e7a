use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use reel_shared::validation::validate_message_text;

use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::models::{fields, paths, Message};
use crate::optimistic::{Composer, MutationController, MutationFailure, PendingMutation};
use crate::session::Session;
use crate::store::{Direction, DocumentStore, Query};
use crate::subscription::{SubscriptionHandle, SubscriptionManager};

use super::send_message;

/// The most recent `limit` messages of a room, oldest first.
pub fn messages_query(room_id: &str, limit: usize) -> Query {
    Query::new(paths::messages(room_id), fields::CREATED_AT, Direction::Ascending)
        .limit_to_last(limit)
}

/// One open conversation: its live transcript and the input buffer.
///
/// Sent messages are never added to the transcript locally; they show up
/// with the next snapshot from the store.
pub struct ChatThread {
    subs: SubscriptionManager,
    store: Arc<dyn DocumentStore>,
    session: Session,
    limit: usize,
    room_id: Option<String>,
    messages: Arc<Mutex<Vec<Message>>>,
    subscription: Option<SubscriptionHandle>,
    composer: Arc<Mutex<Composer>>,
    controller: MutationController,
    failures: Option<mpsc::UnboundedReceiver<MutationFailure>>,
}

impl ChatThread {
    pub fn new(subs: SubscriptionManager, session: Session, config: &Config) -> Self {
        let (controller, failures) = MutationController::new();
        Self {
            store: subs.store().clone(),
            subs,
            session,
            limit: config.thread_message_limit,
            room_id: None,
            messages: Arc::new(Mutex::new(Vec::new())),
            subscription: None,
            composer: Arc::new(Mutex::new(Composer::default())),
            controller,
            failures: Some(failures),
        }
    }

    /// Opens `room_id`. Any previously open room's listener is released
    /// first and its transcript cleared.
    pub fn switch_room(&mut self, room_id: &str) {
        if self.room_id.as_deref() == Some(room_id) {
            return;
        }
        self.close();

        let messages = self.messages.clone();
        let room = room_id.to_string();
        let handle = self
            .subs
            .subscribe(messages_query(room_id, self.limit), move |snapshot| {
                match snapshot.decode::<Message>() {
                    Ok(list) => *messages.lock() = list,
                    Err(e) => tracing::warn!(room = %room, error = %e, "dropping undecodable messages snapshot"),
                }
            });
        tracing::debug!(room = %room_id, "thread opened");
        self.room_id = Some(room_id.to_string());
        self.subscription = Some(handle);
    }

    pub fn close(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.unsubscribe();
        }
        self.room_id = None;
        self.messages.lock().clear();
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().clone()
    }

    pub fn input(&self) -> String {
        self.composer.lock().text().to_string()
    }

    pub fn set_input(&self, text: &str) {
        self.composer.lock().set_text(text);
    }

    pub fn type_text(&self, text: &str) {
        self.composer.lock().push_str(text);
    }

    /// Receiver for failed sends; can be taken once.
    pub fn take_failures(&mut self) -> Option<mpsc::UnboundedReceiver<MutationFailure>> {
        self.failures.take()
    }

    /// Sends the input buffer. The buffer is cleared before this returns; if
    /// the store rejects the message, the text is put back.
    ///
    /// Returns `None` when there was nothing to send.
    pub fn send(&self) -> Result<Option<PendingMutation>> {
        let room_id = self
            .room_id
            .clone()
            .ok_or_else(|| SyncError::Validation("no conversation open".into()))?;

        let text = {
            let mut composer = self.composer.lock();
            let Some(text) = composer.take() else {
                return Ok(None);
            };
            if let Err(e) = validate_message_text(&text) {
                composer.restore(&text);
                return Err(e.into());
            }
            text
        };

        let remote = {
            let store = self.store.clone();
            let session = self.session.clone();
            let room_id = room_id.clone();
            let text = text.clone();
            async move {
                send_message(store.as_ref(), &session, &room_id, &text)
                    .await
                    .map(|_| ())
            }
        };
        let on_failure = {
            let composer = self.composer.clone();
            move |_: &SyncError| composer.lock().restore(&text)
        };

        Ok(Some(self.controller.dispatch(
            "send_message",
            room_id,
            remote,
            |_| {},
            on_failure,
        )))
    }
}

impl Drop for ChatThread {
    fn drop(&mut self) {
        self.close();
    }
}
