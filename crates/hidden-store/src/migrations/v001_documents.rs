//! v001 -- Document tables.
//!
//! Creates `documents`, holding every collection as JSON bodies, and
//! `store_meta`, holding the last issued server timestamp.

use rusqlite::Connection;

const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Documents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS documents (
    seq   INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order, tie-breaker
    path  TEXT NOT NULL,                      -- collection path, e.g. chats/<id>/messages
    id    TEXT NOT NULL,
    data  TEXT NOT NULL,                      -- JSON object

    UNIQUE (path, id)
);

CREATE INDEX IF NOT EXISTS idx_documents_path_seq ON documents(path, seq);

-- ----------------------------------------------------------------
-- Store metadata
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS store_meta (
    key   TEXT PRIMARY KEY NOT NULL,
    value INTEGER NOT NULL
);

INSERT OR IGNORE INTO store_meta (key, value) VALUES ('server_clock', 0);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
