//! Ordered message log of one thread and the writes that extend it.
//!
//! Observation and mutation are separate: [`MessageStream::subscribe`] only
//! reads, and flipping `read` flags is the explicit
//! [`MessageStream::mark_thread_read`] call.  A send writes the message and
//! the thread preview in one atomic batch, so a preview never points at a
//! message that was not stored.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use hidden_shared::constants::{
    CHATS, FIELD_CREATED_AT, FIELD_LAST_MESSAGE, FIELD_LAST_TIMESTAMP, FIELD_OFFER_STATUS,
    FIELD_READ,
};
use hidden_shared::{
    ChatId, Message, MessageBody, MessageId, ModelError, Offer, OfferStatus, UserId,
};
use hidden_store::{subscribe, Direction, DocumentStore, Fields, Query, StoreError, WriteBatch};

use crate::error::{ChatError, Result};
use crate::feed::{decode_all, Feed};

#[derive(Clone)]
pub struct MessageStream {
    store: Arc<dyn DocumentStore>,
}

impl MessageStream {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    fn thread_query(chat_id: &ChatId) -> Query {
        Query::collection(chat_id.messages_path()).order_by(FIELD_CREATED_AT, Direction::Ascending)
    }

    /// Live message list of `chat_id`, oldest first.
    ///
    /// An empty `chat_id` yields a single empty list and issues no query.
    pub fn subscribe(&self, chat_id: &ChatId) -> Feed<Vec<Message>> {
        if chat_id.is_empty() {
            return Feed::ready(Vec::new());
        }
        let subscription = subscribe(self.store.clone(), Self::thread_query(chat_id));
        Feed::project(subscription, |docs| Ok(decode_all(&docs)))
    }

    /// One-shot read of the whole thread, oldest first.
    pub async fn list(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        if chat_id.is_empty() {
            return Ok(Vec::new());
        }
        let docs = self.store.query(&Self::thread_query(chat_id)).await?;
        Ok(decode_all(&docs))
    }

    /// Mark every message addressed to `reader` as read.
    ///
    /// Returns how many messages were flipped.  Nothing is written when
    /// there is nothing to flip, so calling it again is free.
    pub async fn mark_thread_read(&self, chat_id: &ChatId, reader: &UserId) -> Result<usize> {
        if chat_id.is_empty() || reader.is_empty() {
            return Ok(0);
        }

        let unread: Vec<MessageId> = self
            .list(chat_id)
            .await?
            .into_iter()
            .filter(|m| m.is_unread_for(reader))
            .map(|m| m.id)
            .collect();
        if unread.is_empty() {
            return Ok(0);
        }

        let path = chat_id.messages_path();
        let mut batch = WriteBatch::new();
        for id in &unread {
            batch.update(&path, id.as_str(), Fields::new().set(FIELD_READ, true));
        }
        self.store.commit(batch).await?;

        debug!(chat = %chat_id, reader = %reader, count = unread.len(), "Marked thread read");
        Ok(unread.len())
    }

    /// Append a text message.  Callers reject blank text beforehand.
    pub async fn send_text(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        text: &str,
    ) -> Result<MessageId> {
        self.append(
            chat_id,
            sender,
            MessageBody::Text {
                text: text.to_string(),
            },
        )
        .await
    }

    /// Append an offer; it always starts `pending`.  Callers reject
    /// non-positive amounts beforehand.
    pub async fn send_offer(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        offer: Offer,
    ) -> Result<MessageId> {
        let offer = Offer {
            status: OfferStatus::Pending,
            ..offer
        };
        self.append(chat_id, sender, MessageBody::Offer { offer }).await
    }

    async fn append(&self, chat_id: &ChatId, sender: &UserId, body: MessageBody) -> Result<MessageId> {
        if chat_id.is_empty() {
            return Err(ChatError::MissingChat);
        }
        if sender.is_empty() {
            return Err(ChatError::MissingUser);
        }

        let message_id = MessageId::new();
        let preview = body.preview();
        let message = Fields::from_serializable(&body)
            .map_err(StoreError::from)?
            .set("senderId", json!(sender))
            .server_timestamp(FIELD_CREATED_AT)
            .set(FIELD_READ, false);
        let thread = Fields::new()
            .set(FIELD_LAST_MESSAGE, preview)
            .server_timestamp(FIELD_LAST_TIMESTAMP);

        let mut batch = WriteBatch::new();
        batch
            .insert_with_id(chat_id.messages_path(), message_id.as_str(), message)
            .update(CHATS, chat_id.as_str(), thread);
        self.store.commit(batch).await?;

        info!(chat = %chat_id, msg_id = %message_id, sender = %sender, "Message sent");
        Ok(message_id)
    }

    /// Fetch one message.
    pub async fn get(&self, chat_id: &ChatId, message_id: &MessageId) -> Result<Message> {
        let doc = self
            .store
            .get_document(&chat_id.messages_path(), message_id.as_str())
            .await?
            .ok_or_else(|| ChatError::MessageNotFound(message_id.clone()))?;
        Ok(doc.decode()?)
    }

    /// Settle an offer on behalf of `actor`.
    ///
    /// Only the recipient may answer, only `accepted`/`rejected` are
    /// accepted as targets, and a settled offer stays settled: the write
    /// only lands while the stored status is still `pending`, so of two
    /// concurrent answers exactly one succeeds.
    pub async fn update_offer_status(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        actor: &UserId,
        status: OfferStatus,
    ) -> Result<()> {
        let message = self.get(chat_id, message_id).await?;
        let offer = message
            .offer()
            .ok_or_else(|| ChatError::NotAnOffer(message_id.clone()))?;

        if &message.sender_id == actor {
            return Err(ChatError::Unauthorized {
                user: actor.clone(),
                action: "answer their own offer",
            });
        }
        if offer.status.is_terminal() {
            return Err(ChatError::OfferAlreadySettled(offer.status));
        }
        offer.status.transition(status)?;

        let mut batch = WriteBatch::new();
        batch.update_if(
            chat_id.messages_path(),
            message_id.as_str(),
            FIELD_OFFER_STATUS,
            OfferStatus::Pending.to_string(),
            Fields::new().set(FIELD_OFFER_STATUS, status.to_string()),
        );
        self.store.commit(batch).await.map_err(|e| match e {
            StoreError::NotFound(_) => ChatError::MessageNotFound(message_id.clone()),
            StoreError::PreconditionFailed { actual, .. } => {
                match serde_json::from_value::<OfferStatus>(actual.clone()) {
                    Ok(current) => ChatError::OfferAlreadySettled(current),
                    Err(_) => ChatError::Model(ModelError::MalformedDocument {
                        id: message_id.to_string(),
                        reason: format!("unexpected offer status {actual}"),
                    }),
                }
            }
            other => other.into(),
        })?;
        info!(chat = %chat_id, msg_id = %message_id, actor = %actor, %status, "Offer settled");
        Ok(())
    }

    /// Overwrite `offer.status` with no checks at all (last write wins).
    pub async fn force_offer_status(
        &self,
        chat_id: &ChatId,
        message_id: &MessageId,
        status: OfferStatus,
    ) -> Result<()> {
        self.store
            .update_document(
                &chat_id.messages_path(),
                message_id.as_str(),
                Fields::new().set(FIELD_OFFER_STATUS, status.to_string()),
            )
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => ChatError::MessageNotFound(message_id.clone()),
                other => other.into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hidden_shared::PaymentType;
    use hidden_store::MemoryStore;

    async fn setup() -> (Arc<MemoryStore>, MessageStream, ChatId) {
        let store = Arc::new(MemoryStore::new());
        store
            .set_document(
                CHATS,
                "ab",
                Fields::new()
                    .set("participants", json!(["a", "b"]))
                    .set(FIELD_LAST_MESSAGE, "")
                    .server_timestamp(FIELD_LAST_TIMESTAMP),
            )
            .await
            .unwrap();
        let stream = MessageStream::new(store.clone());
        (store, stream, ChatId::from("ab"))
    }

    #[tokio::test]
    async fn empty_chat_id_is_not_subscribed() {
        let (store, stream, _) = setup().await;
        store.fail_reads(true);
        let mut feed = stream.subscribe(&ChatId::from(""));
        assert!(feed.next().await.unwrap().unwrap().is_empty());
        assert!(feed.next().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_senders_stay_ordered() {
        let (_store, stream, chat) = setup().await;
        let mut handles = Vec::new();
        for i in 0..20 {
            let stream = stream.clone();
            let chat = chat.clone();
            let sender = if i % 2 == 0 { "a" } else { "b" };
            handles.push(tokio::spawn(async move {
                stream
                    .send_text(&chat, &UserId::from(sender), &format!("msg {i}"))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let messages = stream.list(&chat).await.unwrap();
        assert_eq!(messages.len(), 20);
        assert!(messages
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn send_updates_preview_atomically() {
        let (store, stream, chat) = setup().await;
        let id = stream
            .send_offer(
                &chat,
                &UserId::from("a"),
                Offer {
                    amount: 50.0,
                    payment_type: PaymentType::Unique,
                    status: OfferStatus::Accepted,
                },
            )
            .await
            .unwrap();

        let message = stream.get(&chat, &id).await.unwrap();
        assert_eq!(message.offer().unwrap().status, OfferStatus::Pending);
        assert!(!message.read);

        let thread = store.get_document(CHATS, "ab").await.unwrap().unwrap();
        assert_eq!(thread.data[FIELD_LAST_MESSAGE], "Offer of 50 (unique)");
        assert_eq!(
            thread.data[FIELD_LAST_TIMESTAMP],
            store
                .get_document(&chat.messages_path(), id.as_str())
                .await
                .unwrap()
                .unwrap()
                .data[FIELD_CREATED_AT]
        );
    }

    #[tokio::test]
    async fn send_into_missing_thread_stores_nothing() {
        let store = Arc::new(MemoryStore::new());
        let stream = MessageStream::new(store.clone());
        let chat = ChatId::from("ghost");
        assert!(stream
            .send_text(&chat, &UserId::from("a"), "hello")
            .await
            .is_err());
        assert_eq!(store.count(&chat.messages_path()).await, 0);
    }

    #[tokio::test]
    async fn mark_read_is_idempotent() {
        let (store, stream, chat) = setup().await;
        stream.send_text(&chat, &UserId::from("a"), "hello").await.unwrap();
        stream.send_text(&chat, &UserId::from("b"), "hi").await.unwrap();

        assert_eq!(stream.mark_thread_read(&chat, &UserId::from("b")).await.unwrap(), 1);
        let commits = store.commit_count();
        assert_eq!(stream.mark_thread_read(&chat, &UserId::from("b")).await.unwrap(), 0);
        assert_eq!(store.commit_count(), commits);

        let messages = stream.list(&chat).await.unwrap();
        assert!(messages[0].read);
        assert!(!messages[1].read);
    }

    #[tokio::test]
    async fn only_the_recipient_settles_an_offer_once() {
        let (_store, stream, chat) = setup().await;
        let id = stream
            .send_offer(&chat, &UserId::from("a"), Offer::new(80.0, PaymentType::Mensuel))
            .await
            .unwrap();

        let err = stream
            .update_offer_status(&chat, &id, &UserId::from("a"), OfferStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Unauthorized { .. }));

        let err = stream
            .update_offer_status(&chat, &id, &UserId::from("b"), OfferStatus::Pending)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Model(_)));

        stream
            .update_offer_status(&chat, &id, &UserId::from("b"), OfferStatus::Rejected)
            .await
            .unwrap();

        let err = stream
            .update_offer_status(&chat, &id, &UserId::from("b"), OfferStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::OfferAlreadySettled(OfferStatus::Rejected)));

        let message = stream.get(&chat, &id).await.unwrap();
        assert_eq!(message.offer().unwrap().status, OfferStatus::Rejected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn simultaneous_answers_settle_an_offer_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(hidden_store::SqliteStore::open_at(&dir.path().join("chat.db")).unwrap());
        store
            .set_document(
                CHATS,
                "ab",
                Fields::new()
                    .set("participants", json!(["a", "b"]))
                    .set(FIELD_LAST_MESSAGE, "")
                    .server_timestamp(FIELD_LAST_TIMESTAMP),
            )
            .await
            .unwrap();
        let stream = MessageStream::new(store);
        let chat = ChatId::from("ab");
        let (a, b) = (UserId::from("a"), UserId::from("b"));

        for round in 0..20 {
            let id = stream
                .send_offer(&chat, &a, Offer::new(50.0, PaymentType::Unique))
                .await
                .unwrap();

            let (accept, reject) = tokio::join!(
                stream.update_offer_status(&chat, &id, &b, OfferStatus::Accepted),
                stream.update_offer_status(&chat, &id, &b, OfferStatus::Rejected),
            );
            assert!(accept.is_ok() != reject.is_ok(), "round {round}: exactly one answer wins");

            let (winner, loser) = if accept.is_ok() {
                (OfferStatus::Accepted, reject)
            } else {
                (OfferStatus::Rejected, accept)
            };
            assert!(matches!(loser, Err(ChatError::OfferAlreadySettled(s)) if s == winner));

            let stored = stream.get(&chat, &id).await.unwrap();
            assert_eq!(stored.offer().unwrap().status, winner);
        }
    }

    #[tokio::test]
    async fn text_messages_cannot_be_settled() {
        let (_store, stream, chat) = setup().await;
        let id = stream.send_text(&chat, &UserId::from("a"), "hello").await.unwrap();
        let err = stream
            .update_offer_status(&chat, &id, &UserId::from("b"), OfferStatus::Accepted)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotAnOffer(_)));
    }

    /// The unguarded write path still lets a settled offer flip again; only
    /// `update_offer_status` enforces terminality.
    #[tokio::test]
    async fn raw_status_write_is_last_write_wins() {
        let (_store, stream, chat) = setup().await;
        let id = stream
            .send_offer(&chat, &UserId::from("a"), Offer::new(10.0, PaymentType::Unique))
            .await
            .unwrap();

        stream
            .force_offer_status(&chat, &id, OfferStatus::Accepted)
            .await
            .unwrap();
        stream
            .force_offer_status(&chat, &id, OfferStatus::Rejected)
            .await
            .unwrap();

        let message = stream.get(&chat, &id).await.unwrap();
        assert_eq!(message.offer().unwrap().status, OfferStatus::Rejected);
    }

    #[tokio::test]
    async fn feed_reflects_status_changes() {
        let (_store, stream, chat) = setup().await;
        let id = stream
            .send_offer(&chat, &UserId::from("a"), Offer::new(10.0, PaymentType::Hebdomadaire))
            .await
            .unwrap();

        let mut feed = stream.subscribe(&chat);
        let first = feed.next().await.unwrap().unwrap();
        assert_eq!(first[0].offer().unwrap().status, OfferStatus::Pending);

        stream
            .update_offer_status(&chat, &id, &UserId::from("b"), OfferStatus::Accepted)
            .await
            .unwrap();
        let second = feed.next().await.unwrap().unwrap();
        assert_eq!(second[0].offer().unwrap().status, OfferStatus::Accepted);
    }
}
