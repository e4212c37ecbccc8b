//! SQLite-backed document store.
//!
//! The [`SqliteStore`] keeps every collection in a single `documents` table
//! as JSON bodies and guarantees that migrations are run before any other
//! operation.  The blocking connection lives behind a mutex and is only
//! touched from `spawn_blocking` tasks, so async callers never stall the
//! runtime.  A write batch maps to one SQLite transaction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::client::{DocumentStore, CHANGE_FEED_CAPACITY};
use crate::clock::ServerClock;
use crate::document::{Change, Direction, Document, Query, Write, WriteBatch};
use crate::error::{Result, StoreError};
use crate::migrations;

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    changes: broadcast::Sender<Change>,
    clock: Arc<ServerClock>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/hidden/hidden.db`
    /// - macOS:   `~/Library/Application Support/com.hidden.hidden/hidden.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\hidden\hidden\data\hidden.db`
    pub fn open_default() -> Result<Self> {
        let project_dirs =
            ProjectDirs::from("com", "hidden", "hidden").ok_or(StoreError::NoDataDir)?;

        let data_dir = project_dirs.data_dir();
        std::fs::create_dir_all(data_dir)?;

        let db_path = data_dir.join("hidden.db");

        tracing::info!(path = %db_path.display(), "opening database");

        Self::open_at(&db_path)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        migrations::run_migrations(&conn)?;

        let last_clock: i64 = conn.query_row(
            "SELECT value FROM store_meta WHERE key = 'server_clock'",
            [],
            |row| row.get(0),
        )?;

        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
            clock: Arc::new(ServerClock::starting_after(last_clock)),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of the open database.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let query = query.clone();
        self.with_conn(move |conn| query_documents(conn, &query)).await
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Vec<String>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let writes = batch.into_writes();
        let clock = self.clock.clone();

        let writes = self
            .with_conn(move |conn| {
                // Stamped under the connection lock so commit order and
                // timestamp order agree.
                let now = clock.next_micros();
                let tx = conn.transaction()?;
                for write in &writes {
                    apply_write(&tx, write, now)?;
                }
                tx.execute(
                    "UPDATE store_meta SET value = MAX(value, ?1) WHERE key = 'server_clock'",
                    params![now],
                )?;
                tx.commit()?;
                Ok(writes)
            })
            .await?;

        let mut ids = Vec::with_capacity(writes.len());
        for write in &writes {
            let _ = self.changes.send(write.change());
            ids.push(write.id().to_string());
        }
        tracing::debug!(writes = ids.len(), "Committed batch");
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_documents(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
    let limit = query.limit.map_or(-1, |l| l as i64);

    let rows: Vec<(String, String)> = match &query.order_by {
        Some(field) => {
            let direction = match query.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            let sql = format!(
                "SELECT id, data FROM documents
                 WHERE path = ?1
                 ORDER BY json_extract(data, ?2) {direction}, seq ASC
                 LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![query.path, format!("$.{field}"), limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let collected = rows.collect::<rusqlite::Result<_>>()?;
            collected
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, data FROM documents
                 WHERE path = ?1
                 ORDER BY seq ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![query.path, limit], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            let collected = rows.collect::<rusqlite::Result<_>>()?;
            collected
        }
    };

    rows.into_iter()
        .map(|(id, data)| Ok(Document::new(id, serde_json::from_str(&data)?)))
        .collect()
}

fn apply_write(tx: &Transaction<'_>, write: &Write, now: i64) -> Result<()> {
    let path = write.path();
    let id = write.id();
    let existing: Option<String> = tx
        .query_row(
            "SELECT data FROM documents WHERE path = ?1 AND id = ?2",
            params![path, id],
            |row| row.get(0),
        )
        .optional()?;

    match (write, existing) {
        (Write::Insert { .. }, Some(_)) => Err(StoreError::AlreadyExists(format!("{path}/{id}"))),
        (Write::Update { .. } | Write::UpdateIf { .. }, None) => {
            Err(StoreError::NotFound(format!("{path}/{id}")))
        }
        (Write::Insert { fields, .. }, None) | (Write::Set { fields, .. }, None) => {
            let mut data = Value::Null;
            fields.apply(&mut data, now);
            tx.execute(
                "INSERT INTO documents (path, id, data) VALUES (?1, ?2, ?3)",
                params![path, id, serde_json::to_string(&data)?],
            )?;
            Ok(())
        }
        (Write::Set { fields, .. }, Some(_)) => {
            let mut data = Value::Null;
            fields.apply(&mut data, now);
            update_body(tx, path, id, &data)
        }
        (Write::Update { fields, .. }, Some(raw)) => {
            let mut data: Value = serde_json::from_str(&raw)?;
            fields.apply(&mut data, now);
            update_body(tx, path, id, &data)
        }
        (
            Write::UpdateIf {
                field,
                expected,
                fields,
                ..
            },
            Some(raw),
        ) => {
            let mut doc = Document::new(id, serde_json::from_str(&raw)?);
            let actual = doc.field(field).cloned().unwrap_or(Value::Null);
            if &actual != expected {
                return Err(StoreError::PreconditionFailed {
                    key: format!("{path}/{id}"),
                    field: field.clone(),
                    actual,
                });
            }
            fields.apply(&mut doc.data, now);
            update_body(tx, path, id, &doc.data)
        }
    }
}

fn update_body(tx: &Transaction<'_>, path: &str, id: &str, data: &Value) -> Result<()> {
    tx.execute(
        "UPDATE documents SET data = ?3 WHERE path = ?1 AND id = ?2",
        params![path, id, serde_json::to_string(data)?],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fields;
    use serde_json::json;

    fn open_temp() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_at(&dir.path().join("test.db")).expect("should open");
        (dir, store)
    }

    #[tokio::test]
    async fn open_round_trip() {
        let (_dir, store) = open_temp();
        assert!(store.path().ends_with("test.db"));
        let docs = store.query(&Query::collection("chats")).await.unwrap();
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn orders_by_json_field() {
        let (_dir, store) = open_temp();
        for n in [3, 1, 2] {
            store
                .insert_document("items", Fields::new().set("n", n))
                .await
                .unwrap();
        }

        let asc = store
            .query(&Query::collection("items").order_by("n", Direction::Ascending))
            .await
            .unwrap();
        let ns: Vec<i64> = asc.iter().map(|d| d.data["n"].as_i64().unwrap()).collect();
        assert_eq!(ns, [1, 2, 3]);

        let top = store
            .query(
                &Query::collection("items")
                    .order_by("n", Direction::Descending)
                    .limit(1),
            )
            .await
            .unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].data["n"], 3);
    }

    #[tokio::test]
    async fn nested_update_and_array_union() {
        let (_dir, store) = open_temp();
        store
            .set_document(
                "chats/c1/messages",
                "m1",
                Fields::new().set("offer", json!({ "amount": 5, "status": "pending" })),
            )
            .await
            .unwrap();
        store
            .update_document(
                "chats/c1/messages",
                "m1",
                Fields::new()
                    .set("offer.status", "rejected")
                    .array_union("deletedFor", vec![json!("a"), json!("a")]),
            )
            .await
            .unwrap();

        let doc = store
            .get_document("chats/c1/messages", "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.data["offer"]["status"], "rejected");
        assert_eq!(doc.data["offer"]["amount"], 5);
        assert_eq!(doc.data["deletedFor"], json!(["a"]));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back() {
        let (_dir, store) = open_temp();
        let mut batch = WriteBatch::new();
        batch.insert("messages", Fields::new().set("text", "x"));
        batch.update("chats", "missing", Fields::new().set("lastMessage", "x"));

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(store
            .query(&Query::collection("messages"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn conditional_updates_race_to_one_winner() {
        let (_dir, store) = open_temp();
        for round in 0..20 {
            let id = format!("m{round}");
            store
                .set_document("msgs", &id, Fields::new().set("offer", json!({ "status": "pending" })))
                .await
                .unwrap();

            let settle = |status: &'static str| {
                let mut batch = WriteBatch::new();
                batch.update_if(
                    "msgs",
                    id.as_str(),
                    "offer.status",
                    "pending",
                    Fields::new().set("offer.status", status),
                );
                store.commit(batch)
            };
            let (accept, reject) = tokio::join!(settle("accepted"), settle("rejected"));
            assert!(accept.is_ok() != reject.is_ok(), "round {round}: exactly one must win");

            let doc = store.get_document("msgs", &id).await.unwrap().unwrap();
            let expected = if accept.is_ok() { "accepted" } else { "rejected" };
            assert_eq!(doc.data["offer"]["status"], expected);
        }
    }

    #[tokio::test]
    async fn clock_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clock.db");

        let first = {
            let store = SqliteStore::open_at(&path).unwrap();
            let id = store
                .insert_document("m", Fields::new().server_timestamp("createdAt"))
                .await
                .unwrap();
            let doc = store.get_document("m", &id).await.unwrap().unwrap();
            doc.data["createdAt"].as_i64().unwrap()
        };

        let store = SqliteStore::open_at(&path).unwrap();
        let id = store
            .insert_document("m", Fields::new().server_timestamp("createdAt"))
            .await
            .unwrap();
        let doc = store.get_document("m", &id).await.unwrap().unwrap();
        assert!(doc.data["createdAt"].as_i64().unwrap() > first);
        assert_eq!(store.query(&Query::collection("m")).await.unwrap().len(), 2);
    }
}
