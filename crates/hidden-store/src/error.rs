use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Document body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An update targeted a document that does not exist.
    #[error("Document not found: {0}")]
    NotFound(String),

    /// A conditional update found `field` holding something else.
    #[error("Precondition failed on {key}: {field} is {actual}")]
    PreconditionFailed {
        key: String,
        field: String,
        actual: serde_json::Value,
    },

    /// An insert targeted an id that is already taken.
    #[error("Document already exists: {0}")]
    AlreadyExists(String),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The backend refused the operation (connection lost, injected failure).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A lock guarding the connection was poisoned by a panicking writer.
    #[error("Store lock poisoned")]
    Poisoned,

    /// A blocking database task failed to complete.
    #[error("Blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
