//! Domain model of the messaging core.
//!
//! Every struct derives `Serialize` and `Deserialize` in the camelCase
//! document shape used by the `users` and `chats` collections, so the same
//! types are read from the store and handed to the HTTP layer.  Timestamps
//! are encoded as integer microseconds so the store can order on them.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_DISPLAY_NAME;
use crate::error::ModelError;
use crate::types::{ChatId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered user, projected from the `users` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Identity-provider subject id (also the document id).
    pub id: UserId,
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Avatar URL.
    #[serde(default)]
    pub avatar: Option<String>,
    /// Last presence ping.
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub last_seen: Option<DateTime<Utc>>,
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_string()
}

impl User {
    /// Whether the user pinged within `window` of `now`.  A user that never
    /// pinged is offline.
    pub fn is_online_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.last_seen.map_or(false, |seen| now - seen < window)
    }
}

// ---------------------------------------------------------------------------
// Offer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType {
    Unique,
    Hebdomadaire,
    Mensuel,
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentType::Unique => "unique",
            PaymentType::Hebdomadaire => "hebdomadaire",
            PaymentType::Mensuel => "mensuel",
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OfferStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl OfferStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }

    /// Validate a lifecycle step.
    ///
    /// `pending -> accepted | rejected` is the only legal move; terminal
    /// states are final.
    pub fn transition(self, to: OfferStatus) -> Result<OfferStatus, ModelError> {
        if self.is_terminal() {
            return Err(ModelError::OfferAlreadySettled(self));
        }
        if !to.is_terminal() {
            return Err(ModelError::InvalidTransition { from: self, to });
        }
        Ok(to)
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
        })
    }
}

/// The recipient's answer to an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferDecision {
    Accept,
    Reject,
}

impl OfferDecision {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            OfferDecision::Accept
        } else {
            OfferDecision::Reject
        }
    }

    pub fn status(self) -> OfferStatus {
        match self {
            OfferDecision::Accept => OfferStatus::Accepted,
            OfferDecision::Reject => OfferStatus::Rejected,
        }
    }
}

/// A monetary proposal embedded in a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub amount: f64,
    pub payment_type: PaymentType,
    #[serde(default)]
    pub status: OfferStatus,
}

impl Offer {
    /// A fresh offer, always `pending`.
    pub fn new(amount: f64, payment_type: PaymentType) -> Self {
        Self {
            amount,
            payment_type,
            status: OfferStatus::Pending,
        }
    }

    /// Denormalized conversation preview for this offer.
    pub fn preview(&self) -> String {
        format!("Offer of {} ({})", self.amount, self.payment_type)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Payload of a message; exactly one of text or offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageBody {
    Text { text: String },
    Offer { offer: Offer },
}

impl MessageBody {
    /// Text shown in the conversation list for this payload.
    pub fn preview(&self) -> String {
        match self {
            MessageBody::Text { text } => text.clone(),
            MessageBody::Offer { offer } => offer.preview(),
        }
    }
}

/// A single message in a thread's `messages` sub-collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    #[serde(flatten)]
    pub body: MessageBody,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
    /// Set once the non-sender has seen the message.
    #[serde(default)]
    pub read: bool,
}

impl Message {
    pub fn offer(&self) -> Option<&Offer> {
        match &self.body {
            MessageBody::Offer { offer } => Some(offer),
            MessageBody::Text { .. } => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { text } => Some(text),
            MessageBody::Offer { .. } => None,
        }
    }

    /// Unread and addressed to `viewer`.
    pub fn is_unread_for(&self, viewer: &UserId) -> bool {
        !self.read && &self.sender_id != viewer
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party chat thread from the `chats` collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ChatId,
    pub participants: Vec<UserId>,
    /// Preview of the latest message.
    #[serde(default)]
    pub last_message: String,
    #[serde(default, with = "chrono::serde::ts_microseconds_option")]
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Users who hid this thread for themselves.
    #[serde(default)]
    pub deleted_for: Vec<UserId>,
    /// Job posting the thread was opened from, if any.
    #[serde(default)]
    pub annonce_id: Option<String>,
    /// Most recent message, attached by the conversation index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_obj: Option<Message>,
}

impl Conversation {
    pub fn includes(&self, user: &UserId) -> bool {
        self.participants.contains(user)
    }

    pub fn is_deleted_for(&self, user: &UserId) -> bool {
        self.deleted_for.contains(user)
    }

    /// Visible in `user`'s conversation list.
    pub fn is_visible_to(&self, user: &UserId) -> bool {
        self.includes(user) && !self.is_deleted_for(user)
    }

    /// The first participant other than `current`, or the first
    /// participant when the thread only lists `current`.
    pub fn other_participant(&self, current: &UserId) -> Option<&UserId> {
        self.participants
            .iter()
            .find(|id| *id != current)
            .or_else(|| self.participants.first())
    }

    /// Unread badge: the latest message waits for `user`.
    pub fn has_unread_for(&self, user: &UserId) -> bool {
        self.last_message_obj
            .as_ref()
            .map_or(false, |m| m.is_unread_for(user))
    }
}

// ---------------------------------------------------------------------------
// Document decoding
// ---------------------------------------------------------------------------

/// Decode a stored document body, injecting its id as the `id` field.
pub fn decode_document<T: DeserializeOwned>(
    id: &str,
    data: &serde_json::Value,
) -> Result<T, ModelError> {
    let mut object = match data {
        serde_json::Value::Object(map) => map.clone(),
        other => {
            return Err(ModelError::MalformedDocument {
                id: id.to_string(),
                reason: format!("expected an object, found {other}"),
            })
        }
    };
    object.insert("id".to_string(), serde_json::Value::String(id.to_string()));

    serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
        ModelError::MalformedDocument {
            id: id.to_string(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn offer_lifecycle() {
        assert_eq!(
            OfferStatus::Pending.transition(OfferStatus::Accepted),
            Ok(OfferStatus::Accepted)
        );
        assert_eq!(
            OfferStatus::Pending.transition(OfferStatus::Rejected),
            Ok(OfferStatus::Rejected)
        );
        assert!(matches!(
            OfferStatus::Pending.transition(OfferStatus::Pending),
            Err(ModelError::InvalidTransition { .. })
        ));
        assert_eq!(
            OfferStatus::Accepted.transition(OfferStatus::Rejected),
            Err(ModelError::OfferAlreadySettled(OfferStatus::Accepted))
        );
    }

    #[test]
    fn text_message_document_shape() {
        let data = json!({
            "senderId": "alice",
            "type": "text",
            "text": "hello",
            "createdAt": 1_700_000_000_000_000i64,
            "read": false,
        });
        let msg: Message = decode_document("m1", &data).unwrap();
        assert_eq!(msg.id, MessageId::from("m1"));
        assert_eq!(msg.text(), Some("hello"));
        assert!(msg.offer().is_none());

        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["type"], "text");
        assert_eq!(back["createdAt"], 1_700_000_000_000_000i64);
    }

    #[test]
    fn offer_message_document_shape() {
        let data = json!({
            "senderId": "alice",
            "type": "offer",
            "offer": { "amount": 50.0, "paymentType": "unique", "status": "pending" },
            "createdAt": 10,
        });
        let msg: Message = decode_document("m2", &data).unwrap();
        let offer = msg.offer().unwrap();
        assert_eq!(offer.payment_type, PaymentType::Unique);
        assert_eq!(offer.status, OfferStatus::Pending);
        assert!(!msg.read);
    }

    #[test]
    fn message_with_both_shapes_missing_is_rejected() {
        let data = json!({ "senderId": "a", "type": "offer", "createdAt": 1 });
        let err = decode_document::<Message>("m3", &data).unwrap_err();
        assert!(matches!(err, ModelError::MalformedDocument { .. }));
    }

    #[test]
    fn offer_preview_text() {
        let offer = Offer::new(50.0, PaymentType::Mensuel);
        assert_eq!(offer.preview(), "Offer of 50 (mensuel)");
    }

    #[test]
    fn conversation_defaults_and_helpers() {
        let data = json!({ "participants": ["a", "b"] });
        let conv: Conversation = decode_document("c1", &data).unwrap();
        assert!(conv.deleted_for.is_empty());
        assert!(conv.last_timestamp.is_none());
        assert_eq!(conv.other_participant(&UserId::from("a")), Some(&UserId::from("b")));
        assert!(conv.is_visible_to(&UserId::from("b")));
        assert!(!conv.is_visible_to(&UserId::from("c")));
        assert!(!conv.has_unread_for(&UserId::from("a")));
    }

    #[test]
    fn online_window() {
        let now = Utc.timestamp_opt(1_000, 0).unwrap();
        let mut user = User {
            id: UserId::from("u"),
            display_name: "U".into(),
            avatar: None,
            last_seen: None,
        };
        assert!(!user.is_online_at(now, Duration::seconds(60)));

        user.last_seen = Some(now - Duration::seconds(59));
        assert!(user.is_online_at(now, Duration::seconds(60)));

        user.last_seen = Some(now - Duration::seconds(60));
        assert!(!user.is_online_at(now, Duration::seconds(60)));
    }

    #[test]
    fn missing_display_name_gets_default() {
        let user: User = decode_document("u1", &json!({})).unwrap();
        assert_eq!(user.display_name, DEFAULT_DISPLAY_NAME);
    }
}
