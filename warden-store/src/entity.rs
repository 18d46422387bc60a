// SPDX-License-Identifier: MIT OR Apache-2.0

//! Node-bearing entities and their persistence into a collection.
//!
//! An [`Entity`] is the common part of everything persisted by identifier: the identifier itself,
//! the [`NodeSet`] of the entity, the collection it is written to and its dirty state. Concrete
//! entity kinds embed an `Entity` and describe their snapshot through the [`Persist`] trait.
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use warden_core::{Identifier, NodeSet};

use crate::cache::Tombstones;
use crate::document::{Document, to_document};
use crate::queue::WriteQueue;

/// Field every snapshot stores the entity identifier under, it is also the key of all writes.
pub const ID_FIELD: &str = "id";

/// Named collection of a document store, paired with the queue its writes go through.
#[derive(Clone)]
pub struct Collection {
    name: Arc<str>,
    queue: WriteQueue,
}

impl Collection {
    pub fn new(name: &str, queue: WriteQueue) -> Self {
        Self {
            name: name.into(),
            queue,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> &WriteQueue {
        &self.queue
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Collection").field(&self.name).finish()
    }
}

/// Save bookkeeping shared between an entity and the write jobs it enqueued.
#[derive(Debug, Default)]
pub(crate) struct SaveState {
    /// Explicitly marked as changed but not saved yet.
    marked: AtomicBool,

    /// Sequence number of the latest enqueued snapshot.
    requested: AtomicU64,

    /// Highest sequence number the store confirmed.
    persisted: AtomicU64,
}

/// Confirmation handle travelling with a write job.
#[derive(Debug)]
pub(crate) enum Ack {
    /// Snapshot with this sequence number reached the store, see [`Entity::save_document`].
    Saved { state: Arc<SaveState>, seq: u64 },

    /// The document is gone from the store, its cache tombstone can be dropped.
    Deleted {
        tombstones: Arc<Tombstones>,
        id: String,
        seq: u64,
    },
}

impl Ack {
    pub(crate) fn acknowledge(self) {
        match self {
            Self::Saved { state, seq } => {
                state.persisted.fetch_max(seq, Ordering::SeqCst);
            }
            Self::Deleted {
                tombstones,
                id,
                seq,
            } => tombstones.release(&id, seq),
        }
    }
}

/// Identifier, nodes and persistence handle of a stored entity.
#[derive(Debug)]
pub struct Entity {
    id: Identifier,
    collection: Collection,
    nodes: NodeSet,
    state: Arc<SaveState>,
    deleted: bool,
}

impl Entity {
    /// Fresh entity with a newly generated identifier, not present in the store yet.
    ///
    /// Fresh entities start out dirty.
    pub fn new(collection: Collection) -> Self {
        let entity = Self::hydrate(Identifier::random(), collection, NodeSet::new());
        entity.mark_dirty();
        entity
    }

    /// Entity restored from a stored snapshot.
    pub fn hydrate(id: Identifier, collection: Collection, nodes: NodeSet) -> Self {
        Self {
            id,
            collection,
            nodes,
            state: Arc::default(),
            deleted: false,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn nodes(&self) -> &NodeSet {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut NodeSet {
        &mut self.nodes
    }

    /// `true` if the entity was marked dirty or a saved snapshot was not confirmed by the store
    /// yet.
    pub fn is_dirty(&self) -> bool {
        self.state.marked.load(Ordering::SeqCst)
            || self.state.persisted.load(Ordering::SeqCst)
                < self.state.requested.load(Ordering::SeqCst)
    }

    pub fn mark_dirty(&self) {
        self.state.marked.store(true, Ordering::SeqCst);
    }

    /// Clear the dirty hint, snapshots still waiting for confirmation keep the entity dirty.
    pub fn mark_clean(&self) {
        self.state.marked.store(false, Ordering::SeqCst);
    }

    /// `true` once the deletion of the entity was enqueued.
    ///
    /// Deleted entities are never written again.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Enqueue a full snapshot of the entity, keyed by its identifier.
    ///
    /// Ignored for deleted entities.
    pub fn save_document(&self, document: Document) {
        if self.deleted {
            debug!(
                collection = self.collection.name(),
                id = %self.id,
                "not saving deleted entity"
            );
            return;
        }

        let seq = self.state.requested.fetch_add(1, Ordering::SeqCst) + 1;
        self.mark_clean();
        self.collection.queue.upsert_with_ack(
            self.collection.name.clone(),
            ID_FIELD,
            &self.id.to_string(),
            document,
            Some(Ack::Saved {
                state: self.state.clone(),
                seq,
            }),
        );
    }

    /// Mark the entity deleted and enqueue the deletion of its document.
    ///
    /// Taking `&mut self` orders the deletion after every save enqueued through a shared borrow.
    pub(crate) fn delete_document(&mut self, ack: Option<Ack>) {
        self.deleted = true;
        self.collection.queue.delete_with_ack(
            self.collection.name.clone(),
            ID_FIELD,
            &self.id.to_string(),
            ack,
        );
    }
}

/// Entity kinds which can be written to and restored from a document store.
pub trait Persist: Send + Sync + Sized + 'static {
    /// Stored form of the entity, rebuilt from scratch on every save.
    type Snapshot: Serialize + DeserializeOwned + Send;

    /// Fields the entity can be looked up by, the first one must be [`ID_FIELD`].
    const INDICES: &'static [&'static str];

    fn entity(&self) -> &Entity;

    fn entity_mut(&mut self) -> &mut Entity;

    /// Current key of the entity in the given index, `None` if the index does not apply.
    fn index_key(&self, field: &str) -> Option<String>;

    fn snapshot(&self) -> Self::Snapshot;

    /// Restore an entity from its stored form.
    fn hydrate(collection: Collection, snapshot: Self::Snapshot) -> Self;

    /// Re-derive the full snapshot and enqueue it.
    ///
    /// Encoding failures are logged and leave the entity dirty. Deleted entities are not saved.
    fn save(&self) {
        let entity = self.entity();
        match to_document(&self.snapshot()) {
            Ok(document) => entity.save_document(document),
            Err(err) => {
                error!(
                    collection = entity.collection().name(),
                    id = %entity.id(),
                    "encoding snapshot failed: {err}"
                );
                entity.mark_dirty();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use warden_core::NodeSet;

    use crate::memory::MemoryStore;
    use crate::queue::WriteQueue;

    use super::{Collection, Entity};

    #[tokio::test]
    async fn dirty_until_confirmed() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 1);
        let collection = Collection::new("channels", queue.clone());

        let mut entity = Entity::new(collection.clone());
        assert!(entity.is_dirty());

        entity.nodes_mut().set("chat.global", true).unwrap();
        let document = match json!({ "id": entity.id().to_string() }) {
            serde_json::Value::Object(document) => document,
            _ => unreachable!(),
        };

        // Failing writes keep the entity dirty.
        store.set_available(false);
        entity.save_document(document.clone());
        queue.flush().await;
        assert!(entity.is_dirty());

        store.set_available(true);
        entity.save_document(document);
        queue.flush().await;
        assert!(!entity.is_dirty());
        assert_eq!(store.documents("channels").len(), 1);

        entity.mark_dirty();
        assert!(entity.is_dirty());
        entity.mark_clean();
        assert!(!entity.is_dirty());

        entity.delete_document(None);
        assert!(entity.is_deleted());
        queue.flush().await;
        assert!(store.documents("channels").is_empty());

        // Saving after the deletion was enqueued does not bring the document back.
        let document = match json!({ "id": entity.id().to_string() }) {
            serde_json::Value::Object(document) => document,
            _ => unreachable!(),
        };
        entity.save_document(document);
        queue.flush().await;
        assert!(store.documents("channels").is_empty());

        let hydrated = Entity::hydrate(entity.id(), collection, NodeSet::new());
        assert!(!hydrated.is_dirty());
    }
}
