//! In-process document store.
//!
//! Keeps every collection in memory, in insertion order.  Used as the
//! injected fake in tests and for embedding the chat core without a
//! database file.  Reads and writes can be made to fail on demand so the
//! error paths of the callers can be exercised.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::client::{DocumentStore, CHANGE_FEED_CAPACITY};
use crate::clock::ServerClock;
use crate::document::{Change, Document, Query, Write, WriteBatch};
use crate::error::{Result, StoreError};

/// Collection path -> documents in insertion order.
type Collections = HashMap<String, Vec<Document>>;

pub struct MemoryStore {
    collections: RwLock<Collections>,
    changes: broadcast::Sender<Change>,
    clock: ServerClock,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            collections: RwLock::new(HashMap::new()),
            changes,
            clock: ServerClock::new(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            commits: AtomicUsize::new(0),
        }
    }

    /// Make every subsequent query fail (or succeed again).
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent commit fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successfully committed batches.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of documents stored under `path`.
    pub async fn count(&self, path: &str) -> usize {
        self.collections
            .read()
            .await
            .get(path)
            .map_or(0, |docs| docs.len())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".into()));
        }
        let docs = self
            .collections
            .read()
            .await
            .get(&query.path)
            .cloned()
            .unwrap_or_default();
        Ok(query.arrange(docs))
    }

    fn changes(&self) -> broadcast::Receiver<Change> {
        self.changes.subscribe()
    }

    async fn commit(&self, batch: WriteBatch) -> Result<Vec<String>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }

        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let writes = batch.into_writes();
        let mut collections = self.collections.write().await;
        let now = self.clock.next_micros();

        // Stage every touched collection so a failing write leaves the
        // committed state untouched.
        let mut staged: HashMap<String, Vec<Document>> = HashMap::new();
        for write in &writes {
            let docs = staged
                .entry(write.path().to_string())
                .or_insert_with(|| collections.get(write.path()).cloned().unwrap_or_default());
            apply_write(docs, write, now)?;
        }
        for (path, docs) in staged {
            collections.insert(path, docs);
        }
        drop(collections);

        self.commits.fetch_add(1, Ordering::SeqCst);
        let mut ids = Vec::with_capacity(writes.len());
        for write in &writes {
            // No receivers is fine.
            let _ = self.changes.send(write.change());
            ids.push(write.id().to_string());
        }
        debug!(writes = ids.len(), "Committed batch");
        Ok(ids)
    }
}

fn apply_write(docs: &mut Vec<Document>, write: &Write, now: i64) -> Result<()> {
    let existing = docs.iter().position(|d| d.id == write.id());
    let key = || format!("{}/{}", write.path(), write.id());

    match (write, existing) {
        (Write::Insert { .. }, Some(_)) => return Err(StoreError::AlreadyExists(key())),
        (Write::Update { .. } | Write::UpdateIf { .. }, None) => {
            return Err(StoreError::NotFound(key()))
        }
        (Write::Insert { id, fields, .. }, None) | (Write::Set { id, fields, .. }, None) => {
            let mut data = Value::Null;
            fields.apply(&mut data, now);
            docs.push(Document::new(id.clone(), data));
        }
        (Write::Set { fields, .. }, Some(index)) => {
            let mut data = Value::Null;
            fields.apply(&mut data, now);
            docs[index].data = data;
        }
        (Write::Update { fields, .. }, Some(index)) => {
            fields.apply(&mut docs[index].data, now);
        }
        (
            Write::UpdateIf {
                field,
                expected,
                fields,
                ..
            },
            Some(index),
        ) => {
            let actual = docs[index].field(field).cloned().unwrap_or(Value::Null);
            if &actual != expected {
                return Err(StoreError::PreconditionFailed {
                    key: key(),
                    field: field.clone(),
                    actual,
                });
            }
            fields.apply(&mut docs[index].data, now);
        }
    }
    Ok(())
}
