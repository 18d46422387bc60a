// SPDX-License-Identifier: MIT OR Apache-2.0

//! Asynchronous, per-document ordered write path to a document store.
//!
//! Callers hand in upserts and deletes and return immediately, the actual store calls run on a
//! fixed set of background workers. Every request is routed to a worker by hashing its
//! collection and key, each worker processes its requests strictly in the order they were
//! enqueued. All writes touching the same document therefore land in the store in enqueue order,
//! a delete can never overtake an earlier upsert of the same document.
//!
//! Failed writes are logged and dropped, they are not retried.
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash as StdHash, Hasher};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::document::Document;
use crate::entity::Ack;
use crate::traits::DocumentStore;

/// Number of workers used when none is configured.
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug)]
enum ToWriteWorker {
    Upsert {
        collection: Arc<str>,
        field: String,
        key: String,
        document: Document,
        ack: Option<Ack>,
    },
    Delete {
        collection: Arc<str>,
        field: String,
        key: String,
        ack: Option<Ack>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to the background write workers.
///
/// Cloning is cheap, all clones feed the same workers.
#[derive(Clone, Debug)]
pub struct WriteQueue {
    workers: Arc<Vec<mpsc::UnboundedSender<ToWriteWorker>>>,
}

impl WriteQueue {
    /// Spawn `workers` background tasks writing into `store`.
    ///
    /// Needs to be called from within a tokio runtime.
    pub fn spawn<S: DocumentStore>(store: S, workers: usize) -> Self {
        let workers = (0..workers.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = WriteWorker {
                    index,
                    store: store.clone(),
                    inbox: rx,
                };
                tokio::task::spawn(worker.run());
                tx
            })
            .collect();

        Self {
            workers: Arc::new(workers),
        }
    }

    /// Enqueue a full replacement of the document whose `field` equals `key`.
    pub fn upsert(&self, collection: &str, field: &str, key: &str, document: Document) {
        self.upsert_with_ack(collection.into(), field, key, document, None);
    }

    pub(crate) fn upsert_with_ack(
        &self,
        collection: Arc<str>,
        field: &str,
        key: &str,
        document: Document,
        ack: Option<Ack>,
    ) {
        let worker = self.worker(&collection, key);
        self.send(
            worker,
            ToWriteWorker::Upsert {
                collection,
                field: field.to_string(),
                key: key.to_string(),
                document,
                ack,
            },
        );
    }

    /// Enqueue the deletion of all documents whose `field` equals `key`.
    ///
    /// Applied after every upsert of the same document which was enqueued before.
    pub fn delete(&self, collection: &str, field: &str, key: &str) {
        self.delete_with_ack(collection.into(), field, key, None);
    }

    pub(crate) fn delete_with_ack(
        &self,
        collection: Arc<str>,
        field: &str,
        key: &str,
        ack: Option<Ack>,
    ) {
        let worker = self.worker(&collection, key);
        self.send(
            worker,
            ToWriteWorker::Delete {
                collection,
                field: field.to_string(),
                key: key.to_string(),
                ack,
            },
        );
    }

    /// Wait until every request enqueued before this call was processed.
    pub async fn flush(&self) {
        let mut replies = Vec::with_capacity(self.workers.len());
        for worker in self.workers.iter() {
            let (reply, reply_rx) = oneshot::channel();
            if worker.send(ToWriteWorker::Flush { reply }).is_ok() {
                replies.push(reply_rx);
            }
        }

        for reply_rx in replies {
            // A worker which already stopped has nothing left to flush.
            let _ = reply_rx.await;
        }
    }

    /// Process all outstanding requests and stop the workers.
    ///
    /// Requests enqueued after shutdown are logged and dropped.
    pub async fn shutdown(&self) {
        let mut replies = Vec::with_capacity(self.workers.len());
        for worker in self.workers.iter() {
            let (reply, reply_rx) = oneshot::channel();
            if worker.send(ToWriteWorker::Shutdown { reply }).is_ok() {
                replies.push(reply_rx);
            }
        }

        for reply_rx in replies {
            let _ = reply_rx.await;
        }
    }

    fn worker(&self, collection: &str, key: &str) -> usize {
        (calculate_hash(&(collection, key)) % self.workers.len() as u64) as usize
    }

    fn send(&self, worker: usize, message: ToWriteWorker) {
        if let Err(err) = self.workers[worker].send(message) {
            match err.0 {
                ToWriteWorker::Upsert {
                    collection, key, ..
                } => error!(%collection, %key, "write queue closed, dropping upsert"),
                ToWriteWorker::Delete {
                    collection, key, ..
                } => error!(%collection, %key, "write queue closed, dropping delete"),
                _ => (),
            }
        }
    }
}

struct WriteWorker<S> {
    index: usize,
    store: S,
    inbox: mpsc::UnboundedReceiver<ToWriteWorker>,
}

impl<S: DocumentStore> WriteWorker<S> {
    async fn run(mut self) {
        while let Some(message) = self.inbox.recv().await {
            match message {
                ToWriteWorker::Upsert {
                    collection,
                    field,
                    key,
                    document,
                    ack,
                } => match self.store.upsert(&collection, &field, document).await {
                    Ok(()) => {
                        debug!(worker = self.index, %collection, %key, "upserted document");
                        if let Some(ack) = ack {
                            ack.acknowledge();
                        }
                    }
                    Err(err) => {
                        error!(%collection, %key, "upserting document failed: {err}");
                    }
                },
                ToWriteWorker::Delete {
                    collection,
                    field,
                    key,
                    ack,
                } => match self.store.delete(&collection, &field, &key).await {
                    Ok(removed) => {
                        debug!(worker = self.index, %collection, %key, removed, "deleted document");
                        if let Some(ack) = ack {
                            ack.acknowledge();
                        }
                    }
                    Err(err) => {
                        error!(%collection, %key, "deleting document failed: {err}");
                    }
                },
                ToWriteWorker::Flush { reply } => {
                    let _ = reply.send(());
                }
                ToWriteWorker::Shutdown { reply } => {
                    debug!(worker = self.index, "write worker stopped");
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }
}

fn calculate_hash<T: StdHash>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use crate::document::Document;
    use crate::memory::MemoryStore;

    use super::WriteQueue;

    fn document(id: &str, version: u64) -> Document {
        match json!({ "id": id, "version": version }) {
            serde_json::Value::Object(document) => document,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn writes_to_the_same_document_keep_their_order() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 4);

        for version in 0..100 {
            queue.upsert("groups", "id", "a", document("a", version));
            queue.upsert("groups", "id", "b", document("b", version));
        }
        queue.flush().await;

        let documents = store.documents("groups");
        assert_eq!(documents.len(), 2);
        for document in documents {
            assert_eq!(document.get("version"), Some(&json!(99)));
        }
    }

    #[tokio::test]
    async fn delete_runs_after_earlier_upserts() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 8);

        queue.upsert("users", "id", "a", document("a", 1));
        queue.upsert("users", "id", "a", document("a", 2));
        queue.delete("users", "id", "a");
        queue.upsert("users", "id", "b", document("b", 1));
        queue.flush().await;

        assert_eq!(store.documents("users"), vec![document("b", 1)]);
    }

    #[tokio::test]
    async fn failed_writes_are_dropped() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 1);

        store.set_available(false);
        queue.upsert("users", "id", "a", document("a", 1));
        queue.flush().await;

        store.set_available(true);
        assert!(store.documents("users").is_empty());

        // The queue keeps working after a failure.
        queue.upsert("users", "id", "a", document("a", 2));
        queue.flush().await;
        assert_eq!(store.documents("users"), vec![document("a", 2)]);
    }

    #[tokio::test]
    async fn shutdown_drains_and_stops() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 2);

        queue.upsert("users", "id", "a", document("a", 1));
        queue.shutdown().await;
        assert_eq!(store.documents("users").len(), 1);

        // Writes after shutdown are dropped and flushing returns right away.
        queue.upsert("users", "id", "a", document("a", 2));
        queue.flush().await;
        assert_eq!(store.documents("users"), vec![document("a", 1)]);
    }
}
