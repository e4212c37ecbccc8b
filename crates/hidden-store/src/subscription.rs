//! Live queries.
//!
//! [`subscribe`] spawns a tokio task that runs a query once, then again
//! every time a write lands in the queried collection, forwarding each full
//! result set through an mpsc channel.  Dropping the [`Subscription`]
//! aborts the task, so a consumer that loses interest never leaves a query
//! running behind it.

use std::sync::Arc;

use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::client::DocumentStore;
use crate::document::{Change, Document, Query};
use crate::error::Result;

/// Snapshots buffered between the query task and its consumer.
const SNAPSHOT_BUFFER: usize = 16;

/// Handle to a running live query.
pub struct Subscription {
    rx: mpsc::Receiver<Result<Vec<Document>>>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Wait for the next snapshot.  `None` once the query task has ended.
    pub async fn next(&mut self) -> Option<Result<Vec<Document>>> {
        self.rx.recv().await
    }

    /// Stop the live query.
    pub fn cancel(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a live query against `store`.
///
/// The first snapshot is the current result; later snapshots follow
/// writes to `query.path`.  Bursts of writes are coalesced into a single
/// re-query.  Query failures are forwarded as `Err` items and the task
/// keeps listening.
pub fn subscribe(store: Arc<dyn DocumentStore>, query: Query) -> Subscription {
    let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
    // Listen before the first query so no write slips between the two.
    let mut changes = store.changes();

    let task = tokio::spawn(async move {
        loop {
            let snapshot = store.query(&query).await;
            if let Err(e) = &snapshot {
                warn!(path = %query.path, error = %e, "Live query failed");
            }
            if tx.send(snapshot).await.is_err() {
                debug!(path = %query.path, "Live query consumer gone");
                return;
            }

            if !wait_for_change(&mut changes, &query.path).await {
                return;
            }
        }
    });

    Subscription { rx, task }
}

/// Block until a write touches `path`, then drain whatever else is queued.
/// Returns `false` when the change feed is closed.
async fn wait_for_change(changes: &mut broadcast::Receiver<Change>, path: &str) -> bool {
    loop {
        match changes.recv().await {
            Ok(change) if change.path == path => break,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                debug!(path, skipped, "Change feed lagged, re-querying");
                break;
            }
            Err(RecvError::Closed) => return false,
        }
    }

    loop {
        match changes.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Closed) => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Direction, Fields};
    use crate::memory::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn emits_initial_and_updated_snapshots() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_document("items", Fields::new().set("n", 1))
            .await
            .unwrap();

        let mut sub = subscribe(
            store.clone(),
            Query::collection("items").order_by("n", Direction::Ascending),
        );
        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.len(), 1);

        store
            .insert_document("items", Fields::new().set("n", 0))
            .await
            .unwrap();
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second[0].data["n"], json!(0));
    }

    #[tokio::test]
    async fn ignores_other_collections() {
        let store = Arc::new(MemoryStore::new());
        let mut sub = subscribe(store.clone(), Query::collection("a"));
        assert!(sub.next().await.unwrap().unwrap().is_empty());

        store.insert_document("b", Fields::new()).await.unwrap();
        store.insert_document("a", Fields::new()).await.unwrap();

        let next = sub.next().await.unwrap().unwrap();
        assert_eq!(next.len(), 1);
    }

    #[tokio::test]
    async fn read_failures_are_forwarded() {
        let store = Arc::new(MemoryStore::new());
        store.fail_reads(true);
        let mut sub = subscribe(store.clone(), Query::collection("a"));
        assert!(sub.next().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn dropping_stops_the_task() {
        let store = Arc::new(MemoryStore::new());
        let sub = subscribe(store.clone(), Query::collection("a"));
        assert_eq!(Arc::strong_count(&store), 2);
        drop(sub);
        // The aborted task releases its clone of the store.
        for _ in 0..100 {
            if Arc::strong_count(&store) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(Arc::strong_count(&store), 1);
    }
}
