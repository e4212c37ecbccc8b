//! # hidden-chat
//!
//! Messaging core of HIDDEN: the user directory, the per-user conversation
//! index, per-thread message streams with embedded offers, and the
//! [`ChatOrchestrator`] façade a chat screen talks to.
//!
//! Every component receives its [`DocumentStore`] injected at construction
//! and exposes live reads as [`Feed`]s, which stop their background work
//! when dropped.
//!
//! [`DocumentStore`]: hidden_store::DocumentStore

pub mod conversations;
pub mod directory;
pub mod feed;
pub mod messages;
pub mod orchestrator;
pub mod settings;

mod error;

pub use conversations::{search_conversations, ConversationIndex};
pub use directory::{find_other_participant, UserDirectory};
pub use error::{ChatError, Result};
pub use feed::Feed;
pub use messages::MessageStream;
pub use orchestrator::{ChatOrchestrator, ChatSession};
pub use settings::ChatSettings;
