use thiserror::Error;

use hidden_shared::{ChatId, MessageId, ModelError, OfferStatus, UserId};
use hidden_store::StoreError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Message text is empty")]
    EmptyMessage,

    #[error("Message too long: {len} characters (max {max})")]
    MessageTooLong { len: usize, max: usize },

    #[error("Offer amount must be a positive number, got {0}")]
    InvalidOfferAmount(f64),

    #[error("A conversation needs at least one participant besides its creator")]
    NotEnoughParticipants,

    #[error("No current user")]
    MissingUser,

    #[error("No conversation selected")]
    MissingChat,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(ChatId),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Message {0} is not an offer")]
    NotAnOffer(MessageId),

    #[error("User {user} is not allowed to {action}")]
    Unauthorized { user: UserId, action: &'static str },

    #[error("Offer already settled as {0}")]
    OfferAlreadySettled(OfferStatus),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ChatError {
    /// Rejected before any store call was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage
                | ChatError::MessageTooLong { .. }
                | ChatError::InvalidOfferAmount(_)
                | ChatError::NotEnoughParticipants
                | ChatError::MissingUser
                | ChatError::MissingChat
        )
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
