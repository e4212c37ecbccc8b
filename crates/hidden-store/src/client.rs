//! The document store contract consumed by the messaging core.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::document::{Change, Document, Fields, Query, WriteBatch};
use crate::error::Result;

/// Capacity of every store's change feed.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

/// A document database with collection queries, atomic batches and a
/// change feed.
///
/// Implementations must be cheap to share behind an `Arc`; every
/// component of the chat core receives one injected at construction.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a one-shot collection query.
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Receive one [`Change`] per document written from now on.
    fn changes(&self) -> broadcast::Receiver<Change>;

    /// Commit every write of `batch` atomically and return the ids of the
    /// written documents, in batch order.
    async fn commit(&self, batch: WriteBatch) -> Result<Vec<String>>;

    /// Create a document under a generated id.
    async fn insert_document(&self, path: &str, fields: Fields) -> Result<String> {
        let mut batch = WriteBatch::new();
        let id = batch.insert(path, fields);
        self.commit(batch).await?;
        Ok(id)
    }

    /// Create or replace the document `path/id`.
    async fn set_document(&self, path: &str, id: &str, fields: Fields) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(path, id, fields);
        self.commit(batch).await?;
        Ok(())
    }

    /// Apply field writes to an existing document.
    async fn update_document(&self, path: &str, id: &str, fields: Fields) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(path, id, fields);
        self.commit(batch).await?;
        Ok(())
    }

    /// Fetch one document by id.
    async fn get_document(&self, path: &str, id: &str) -> Result<Option<Document>> {
        let docs = self.query(&Query::collection(path)).await?;
        Ok(docs.into_iter().find(|d| d.id == id))
    }
}
