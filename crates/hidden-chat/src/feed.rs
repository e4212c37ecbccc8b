//! Live, cancellable sequences of read-model snapshots.
//!
//! A [`Feed`] is the consumer end of a background task that turns store
//! snapshots into domain values.  Each item is a full replacement of the
//! previous one.  Dropping the feed aborts the task together with the store
//! subscription it owns.

use std::future::Future;

use futures::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use hidden_store::{Document, Subscription};

use crate::error::Result;

/// Snapshots buffered between a feed task and its consumer.
const FEED_BUFFER: usize = 16;

pub struct Feed<T> {
    rx: mpsc::Receiver<Result<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Feed<T> {
    /// A feed that yields `value` once and then ends, without touching the
    /// store.
    pub fn ready(value: T) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 and a fresh channel: this cannot fail.
        let _ = tx.try_send(Ok(value));
        Self { rx, task: None }
    }

    /// Run `producer` in the background; it pushes snapshots into the
    /// sender it is given and should return once sending fails.
    pub fn spawn<F, Fut>(producer: F) -> Self
    where
        F: FnOnce(mpsc::Sender<Result<T>>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let task = tokio::spawn(producer(tx));
        Self {
            rx,
            task: Some(task),
        }
    }

    /// Forward every snapshot of `subscription` through `project`.
    pub fn project<P>(mut subscription: Subscription, mut project: P) -> Self
    where
        P: FnMut(Vec<Document>) -> Result<T> + Send + 'static,
    {
        Self::spawn(move |tx| async move {
            while let Some(snapshot) = subscription.next().await {
                let item = snapshot.map_err(Into::into).and_then(&mut project);
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        })
    }

    /// Wait for the next snapshot.  `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<Result<T>> {
        self.rx.recv().await
    }

    /// Adapt into a [`Stream`] (e.g. for server-sent events).
    pub fn into_stream(self) -> impl Stream<Item = Result<T>> + Send {
        futures::stream::unfold(self, |mut feed| async move {
            let item = feed.next().await?;
            Some((item, feed))
        })
    }
}

impl<T> Drop for Feed<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Decode every document, dropping (and logging) the malformed ones.
pub(crate) fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match doc.decode() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(doc = %doc.id, error = %e, "Skipping malformed document");
                None
            }
        })
        .collect()
}
