//! Tunables of the chat core.

use chrono::Duration;

use hidden_shared::constants::{MAX_MESSAGE_LEN, ONLINE_WINDOW_SECS};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// A user counts as online when their last presence ping is younger.
    pub online_window: Duration,
    /// Longest accepted text message, in characters.
    pub max_message_len: usize,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            online_window: Duration::seconds(ONLINE_WINDOW_SECS),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}
