/// Application name
pub const APP_NAME: &str = "HIDDEN";

/// Collection holding one document per registered user
pub const USERS: &str = "users";

/// Collection holding one document per conversation thread
pub const CHATS: &str = "chats";

/// Name of the per-thread message sub-collection
pub const MESSAGES: &str = "messages";

/// Document field names
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_LAST_TIMESTAMP: &str = "lastTimestamp";
pub const FIELD_LAST_MESSAGE: &str = "lastMessage";
pub const FIELD_LAST_SEEN: &str = "lastSeen";
pub const FIELD_DELETED_FOR: &str = "deletedFor";
pub const FIELD_READ: &str = "read";
pub const FIELD_OFFER_STATUS: &str = "offer.status";

/// A user counts as online when seen within this many seconds
pub const ONLINE_WINDOW_SECS: i64 = 60;

/// Default upper bound on text message length, in characters
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Display name given to users whose identity carries none
pub const DEFAULT_DISPLAY_NAME: &str = "Utilisateur";

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;
