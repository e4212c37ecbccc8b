//! The façade a chat screen talks to.
//!
//! [`ChatOrchestrator`] wires the directory, the conversation index and the
//! message stream to one injected store.  [`ChatOrchestrator::open`] gives a
//! [`ChatSession`] per open thread: it owns the live feeds of that screen,
//! marks incoming messages read as they arrive, validates input before any
//! write, and resolves the other participant.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use hidden_shared::{
    ChatId, Conversation, Message, MessageId, Offer, OfferDecision, PaymentType, User, UserId,
};
use hidden_store::DocumentStore;

use crate::conversations::ConversationIndex;
use crate::directory::{find_other_participant, UserDirectory};
use crate::error::{ChatError, Result};
use crate::feed::Feed;
use crate::messages::MessageStream;
use crate::settings::ChatSettings;

#[derive(Clone)]
pub struct ChatOrchestrator {
    directory: UserDirectory,
    conversations: ConversationIndex,
    messages: MessageStream,
    settings: ChatSettings,
}

impl ChatOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, settings: ChatSettings) -> Self {
        Self {
            directory: UserDirectory::new(store.clone()),
            conversations: ConversationIndex::new(store.clone()),
            messages: MessageStream::new(store),
            settings,
        }
    }

    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    pub fn conversations(&self) -> &ConversationIndex {
        &self.conversations
    }

    pub fn messages(&self) -> &MessageStream {
        &self.messages
    }

    pub fn settings(&self) -> &ChatSettings {
        &self.settings
    }

    /// Live conversation list of `user`.
    pub fn conversations_for(&self, user: &UserId) -> Feed<Vec<Conversation>> {
        self.conversations.subscribe(user)
    }

    /// Open `chat_id` for `current`.
    ///
    /// With no current user or no chat selected the session renders empty
    /// and every write is refused.  A thread that does not exist, or that
    /// `current` is not part of, cannot be opened.
    pub async fn open(&self, current: &UserId, chat_id: &ChatId) -> Result<ChatSession> {
        let conversation = if current.is_empty() || chat_id.is_empty() {
            None
        } else {
            let conversation = self
                .conversations
                .get(chat_id)
                .await?
                .ok_or_else(|| ChatError::ConversationNotFound(chat_id.clone()))?;
            if !conversation.includes(current) {
                return Err(ChatError::Unauthorized {
                    user: current.clone(),
                    action: "open a conversation they are not part of",
                });
            }
            Some(conversation)
        };

        let (messages_feed, users_feed) = if current.is_empty() {
            (Feed::ready(Vec::new()), Feed::ready(Vec::new()))
        } else {
            (self.messages.subscribe(chat_id), self.directory.list_users())
        };

        Ok(ChatSession {
            current: current.clone(),
            chat_id: chat_id.clone(),
            conversation,
            messages: Vec::new(),
            users: Vec::new(),
            users_loaded: false,
            messages_feed,
            users_feed,
            stream: self.messages.clone(),
            settings: self.settings.clone(),
        })
    }

    /// Start a thread between `current` and `others`.
    ///
    /// No lookup is made for an existing thread between the same users:
    /// each call creates a new one.
    pub async fn create_conversation(
        &self,
        current: &UserId,
        others: &[UserId],
        annonce_id: Option<String>,
    ) -> Result<ChatId> {
        if current.is_empty() {
            return Err(ChatError::MissingUser);
        }

        let mut participants = vec![current.clone()];
        for other in others {
            if !other.is_empty() && !participants.contains(other) {
                participants.push(other.clone());
            }
        }
        if participants.len() < 2 {
            return Err(ChatError::NotEnoughParticipants);
        }

        self.conversations.create(participants, annonce_id).await
    }

    /// Hide `chat_id` from `user`'s list.
    pub async fn soft_delete(&self, chat_id: &ChatId, user: &UserId) -> Result<()> {
        self.conversations.soft_delete(chat_id, user).await
    }
}

/// Live state and actions of one open chat screen.
///
/// Dropping the session stops its feeds.
pub struct ChatSession {
    current: UserId,
    chat_id: ChatId,
    conversation: Option<Conversation>,
    messages: Vec<Message>,
    users: Vec<User>,
    users_loaded: bool,
    messages_feed: Feed<Vec<Message>>,
    users_feed: Feed<Vec<User>>,
    stream: MessageStream,
    settings: ChatSettings,
}

impl ChatSession {
    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn current_user(&self) -> &UserId {
        &self.current
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Last received message list.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Wait for the next message list.
    ///
    /// Messages addressed to the viewer that are still unread get marked
    /// read; a failure there is logged and does not hide the list.
    pub async fn next_messages(&mut self) -> Option<Result<&[Message]>> {
        match self.messages_feed.next().await? {
            Ok(messages) => {
                self.messages = messages;
                if self.messages.iter().any(|m| m.is_unread_for(&self.current)) {
                    if let Err(e) = self.stream.mark_thread_read(&self.chat_id, &self.current).await {
                        warn!(chat = %self.chat_id, error = %e, "Failed to mark thread read");
                    }
                }
                Some(Ok(&self.messages))
            }
            Err(e) => Some(Err(e)),
        }
    }

    /// Wait for the first user list if none has arrived yet.
    pub async fn load_users(&mut self) -> Result<()> {
        if self.users_loaded {
            return Ok(());
        }
        if let Some(item) = self.users_feed.next().await {
            self.users = item?;
            self.users_loaded = true;
        }
        Ok(())
    }

    /// The other participant, once both the thread and the directory are
    /// known.
    pub fn other_participant(&self) -> Option<&User> {
        let conversation = self.conversation.as_ref()?;
        find_other_participant(&self.users, &conversation.participants, &self.current)
    }

    pub fn is_other_online(&self) -> bool {
        self.other_participant()
            .map_or(false, |u| u.is_online_at(Utc::now(), self.settings.online_window))
    }

    fn require_target(&self) -> Result<()> {
        if self.current.is_empty() {
            return Err(ChatError::MissingUser);
        }
        if self.chat_id.is_empty() {
            return Err(ChatError::MissingChat);
        }
        Ok(())
    }

    pub async fn send_text(&self, text: &str) -> Result<MessageId> {
        self.require_target()?;
        let text = validate_text(text, self.settings.max_message_len)?;
        self.stream.send_text(&self.chat_id, &self.current, text).await
    }

    pub async fn send_offer(&self, amount: f64, payment_type: PaymentType) -> Result<MessageId> {
        self.require_target()?;
        validate_amount(amount)?;
        self.stream
            .send_offer(&self.chat_id, &self.current, Offer::new(amount, payment_type))
            .await
    }

    pub async fn respond_to_offer(&self, message_id: &MessageId, accept: bool) -> Result<()> {
        self.require_target()?;
        let status = OfferDecision::from_accept(accept).status();
        self.stream
            .update_offer_status(&self.chat_id, message_id, &self.current, status)
            .await?;
        info!(chat = %self.chat_id, msg_id = %message_id, accept, "Offer answered");
        Ok(())
    }
}

/// Trimmed text, or why it cannot be sent.
pub fn validate_text(text: &str, max_len: usize) -> Result<&str> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    let len = trimmed.chars().count();
    if len > max_len {
        return Err(ChatError::MessageTooLong { len, max: max_len });
    }
    Ok(trimmed)
}

pub fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(ChatError::InvalidOfferAmount(amount));
    }
    Ok(())
}
