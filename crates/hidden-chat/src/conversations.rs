//! Per-user index of chat threads.
//!
//! The index watches the `chats` collection ordered by `lastTimestamp`
//! (newest first), keeps the threads the viewer takes part in and has not
//! hidden, and decorates each with its latest message.  It also re-evaluates
//! when a message of a visible thread changes, so unread badges follow read
//! flips.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

use hidden_shared::constants::{
    CHATS, FIELD_CREATED_AT, FIELD_DELETED_FOR, FIELD_LAST_MESSAGE, FIELD_LAST_TIMESTAMP,
    MESSAGES,
};
use hidden_shared::{ChatId, Conversation, Message, User, UserId};
use hidden_store::{subscribe, Direction, DocumentStore, Fields, Query};

use crate::directory::find_other_participant;
use crate::error::{ChatError, Result};
use crate::feed::{decode_all, Feed};

#[derive(Clone)]
pub struct ConversationIndex {
    store: Arc<dyn DocumentStore>,
}

impl ConversationIndex {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Live list of the conversations visible to `user`, newest first.
    ///
    /// An empty `user` yields a single empty list and issues no query.
    pub fn subscribe(&self, user: &UserId) -> Feed<Vec<Conversation>> {
        if user.is_empty() {
            return Feed::ready(Vec::new());
        }

        let store = self.store.clone();
        let user = user.clone();

        Feed::spawn(move |tx| async move {
            // Listen before subscribing so message writes racing the first
            // snapshot are not missed.
            let mut changes = store.changes();
            let mut chats = subscribe(
                store.clone(),
                Query::collection(CHATS).order_by(FIELD_LAST_TIMESTAMP, Direction::Descending),
            );
            // Threads visible to `user` in the latest snapshot.
            let mut visible: Option<Vec<Conversation>> = None;

            loop {
                tokio::select! {
                    snapshot = chats.next() => match snapshot {
                        None => return,
                        Some(Ok(docs)) => {
                            visible = Some(
                                decode_all::<Conversation>(&docs)
                                    .into_iter()
                                    .filter(|c| c.is_visible_to(&user))
                                    .collect(),
                            );
                        }
                        Some(Err(e)) => {
                            if tx.send(Err(e.into())).await.is_err() {
                                return;
                            }
                            continue;
                        }
                    },
                    change = changes.recv() => match change {
                        Ok(change) => {
                            let touches_visible = match (thread_of(&change.path), &visible) {
                                (Some(chat_id), Some(threads)) => {
                                    threads.iter().any(|c| c.id.as_str() == chat_id)
                                }
                                _ => false,
                            };
                            if !touches_visible {
                                continue;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "Conversation index lagged, re-evaluating");
                        }
                        Err(RecvError::Closed) => return,
                    },
                }

                let Some(threads) = &visible else { continue };
                let result = decorate(store.as_ref(), threads.clone()).await;
                if tx.send(result).await.is_err() {
                    return;
                }
            }
        })
    }

    /// Hide `chat_id` from `user`'s list.  The other participant keeps
    /// seeing it and no message is touched.  Idempotent.
    pub async fn soft_delete(&self, chat_id: &ChatId, user: &UserId) -> Result<()> {
        if chat_id.is_empty() {
            return Err(ChatError::MissingChat);
        }
        if user.is_empty() {
            return Err(ChatError::MissingUser);
        }

        let fields = Fields::new().array_union(FIELD_DELETED_FOR, vec![json!(user)]);
        match self
            .store
            .update_document(CHATS, chat_id.as_str(), fields)
            .await
        {
            Ok(()) => {
                info!(chat = %chat_id, user = %user, "Conversation hidden for user");
                Ok(())
            }
            Err(e) => {
                warn!(chat = %chat_id, user = %user, error = %e, "Failed to hide conversation");
                Err(e.into())
            }
        }
    }

    /// One-shot read of a single conversation, without its latest message.
    pub async fn get(&self, chat_id: &ChatId) -> Result<Option<Conversation>> {
        if chat_id.is_empty() {
            return Ok(None);
        }
        let doc = self.store.get_document(CHATS, chat_id.as_str()).await?;
        Ok(match doc {
            Some(doc) => Some(doc.decode()?),
            None => None,
        })
    }

    /// Store a new thread.  Callers validate `participants`.
    pub async fn create(
        &self,
        participants: Vec<UserId>,
        annonce_id: Option<String>,
    ) -> Result<ChatId> {
        let chat_id = ChatId::new();
        let fields = Fields::new()
            .set("participants", json!(participants))
            .set("annonceId", json!(annonce_id))
            .set(FIELD_LAST_MESSAGE, "")
            .server_timestamp(FIELD_LAST_TIMESTAMP)
            .set(FIELD_DELETED_FOR, json!([]));

        let mut batch = hidden_store::WriteBatch::new();
        batch.insert_with_id(CHATS, chat_id.as_str(), fields);
        self.store.commit(batch).await?;

        info!(chat = %chat_id, participants = participants.len(), "Conversation created");
        Ok(chat_id)
    }
}

/// Chat id of a `chats/<id>/messages` path.
fn thread_of(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(CHATS)?.strip_prefix('/')?;
    let (chat_id, tail) = rest.split_once('/')?;
    (tail == MESSAGES).then_some(chat_id)
}

/// Attach the latest message of each thread.
async fn decorate(
    store: &dyn DocumentStore,
    threads: Vec<Conversation>,
) -> Result<Vec<Conversation>> {
    let mut visible = Vec::with_capacity(threads.len());

    for mut conversation in threads {
        let latest = store
            .query(
                &Query::collection(conversation.id.messages_path())
                    .order_by(FIELD_CREATED_AT, Direction::Descending)
                    .limit(1),
            )
            .await?;
        conversation.last_message_obj = decode_all::<Message>(&latest).pop();
        visible.push(conversation);
    }

    Ok(visible)
}

/// Case-insensitive filter on the other participant's display name or the
/// last message preview.  An empty term keeps everything.
pub fn search_conversations<'a>(
    conversations: &'a [Conversation],
    users: &[User],
    current: &UserId,
    term: &str,
) -> Vec<&'a Conversation> {
    let term = term.trim().to_lowercase();
    conversations
        .iter()
        .filter(|conversation| {
            if term.is_empty() {
                return true;
            }
            let name = conversation
                .other_participant(current)
                .and_then(|other| users.iter().find(|u| &u.id == other))
                .or_else(|| find_other_participant(users, &conversation.participants, current))
                .map(|u| u.display_name.to_lowercase())
                .unwrap_or_default();
            name.contains(&term) || conversation.last_message.to_lowercase().contains(&term)
        })
        .collect()
}
