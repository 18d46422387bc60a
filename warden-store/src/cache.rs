// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-key in-memory index over the live entities of one kind.
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error};

use crate::document::{Document, DocumentError, from_document};
use crate::entity::{Ack, Collection, ID_FIELD, Persist};
use crate::traits::DocumentStore;

/// Live, shared entity instance.
///
/// Every index of a cache points at the same instance, callers lock it briefly and never across
/// an `.await`.
pub type Shared<E> = Arc<RwLock<E>>;

/// Get-or-load cache of entities, indexed by every field listed in [`Persist::INDICES`].
///
/// Lookups missing in memory fall through to the store and register the hydrated entity in all
/// applicable indices. Misses are not cached, asking for an unknown key queries the store again.
/// Entities stay cached until they are explicitly removed. Removed entities leave a tombstone and
/// are not loaded from the store again, even while their deletion is still waiting in the write
/// queue. The tombstone of a [deleted](Self::delete) entity is dropped once the store confirmed
/// the deletion, entities which were only [removed](Self::remove) keep theirs.
pub struct EntityCache<S, E> {
    store: S,
    collection: Collection,
    indices: HashMap<&'static str, DashMap<String, Shared<E>>>,
    tombstones: Arc<Tombstones>,
}

/// Identifiers of removed entities, each with the sequence number of its latest removal.
#[derive(Debug, Default)]
pub(crate) struct Tombstones {
    ids: DashMap<String, u64>,
    buried: AtomicU64,
    released: AtomicU64,
}

impl Tombstones {
    fn bury(&self, id: String) -> u64 {
        let seq = self.buried.fetch_add(1, Ordering::SeqCst) + 1;
        self.ids.insert(id, seq);
        seq
    }

    fn revive(&self, id: &str) {
        self.ids.remove(id);
    }

    fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    /// Drop the tombstone, unless the entity was removed again after this removal.
    pub(crate) fn release(&self, id: &str, seq: u64) {
        // Counted before the id disappears, loads compare it to notice releases racing them.
        self.released.fetch_add(1, Ordering::SeqCst);
        self.ids.remove_if(id, |_, buried| *buried == seq);
    }

    fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

/// Outcome of registering a hydrated entity.
enum Adoption<E> {
    Live(Shared<E>),
    Removed,

    /// A tombstone was released while the document was loaded, it might be stale.
    Stale,
}

impl<S, E> EntityCache<S, E>
where
    S: DocumentStore,
    E: Persist,
{
    pub fn new(store: S, collection: Collection) -> Self {
        debug_assert_eq!(E::INDICES.first(), Some(&ID_FIELD));

        let indices = E::INDICES
            .iter()
            .map(|field| (*field, DashMap::new()))
            .collect();

        Self {
            store,
            collection,
            indices,
            tombstones: Arc::default(),
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Cached entity for the key, without consulting the store.
    pub fn lookup(&self, field: &str, key: &str) -> Option<Shared<E>> {
        self.indices
            .get(field)?
            .get(key)
            .map(|entity| entity.value().clone())
    }

    /// Cached entity for the key, loaded from the store on a miss.
    ///
    /// Returns `None` if the store has no such document either. Transport failures surface as
    /// [`CacheError::StoreUnavailable`].
    pub async fn get(&self, field: &str, key: &str) -> Result<Option<Shared<E>>, CacheError> {
        if !self.indices.contains_key(field) {
            return Err(CacheError::UnknownIndex(field.to_string()));
        }

        loop {
            if let Some(entity) = self.lookup(field, key) {
                return Ok(Some(entity));
            }

            let released = self.tombstones.released();
            let documents = self
                .store
                .find(self.collection.name(), field, key)
                .await
                .map_err(|err| CacheError::StoreUnavailable(Box::new(err)))?;

            let Some(document) = documents.into_iter().next() else {
                return Ok(None);
            };

            debug!(
                collection = self.collection.name(),
                field, key, "loaded entity from store"
            );

            let entity = match self.adopt(self.decode(document)?, released) {
                Adoption::Live(entity) => entity,
                Adoption::Removed => return Ok(None),
                Adoption::Stale => continue,
            };

            // The live instance wins over the stored one, it might not carry the key anymore.
            if entity.read().index_key(field).as_deref() != Some(key) {
                return Ok(None);
            }

            return Ok(Some(entity));
        }
    }

    /// Load every document of the collection and register all entities not cached yet.
    ///
    /// Documents which can not be decoded are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<Shared<E>>, CacheError> {
        'load: loop {
            let released = self.tombstones.released();
            let documents = self
                .store
                .find_all(self.collection.name())
                .await
                .map_err(|err| CacheError::StoreUnavailable(Box::new(err)))?;

            let mut entities = Vec::with_capacity(documents.len());
            for document in documents {
                let entity = match self.decode(document) {
                    Ok(entity) => entity,
                    Err(err) => {
                        error!(collection = self.collection.name(), "skipping document: {err}");
                        continue;
                    }
                };

                match self.adopt(entity, released) {
                    Adoption::Live(entity) => entities.push(entity),
                    Adoption::Removed => (),
                    Adoption::Stale => continue 'load,
                }
            }

            return Ok(entities);
        }
    }

    /// Register a new entity in all applicable indices and return its shared handle.
    pub fn insert(&self, entity: E) -> Shared<E> {
        let entity = Arc::new(RwLock::new(entity));
        self.register(&entity);
        entity
    }

    /// Insert the entity into every applicable index, overwriting what was registered under the
    /// same keys before.
    pub fn register(&self, entity: &Shared<E>) {
        let id = entity.read().entity().id().to_string();
        self.tombstones.revive(&id);

        for (field, key) in self.keys(entity) {
            if let Some(index) = self.indices.get(field) {
                index.insert(key, entity.clone());
            }
        }
    }

    /// Remove the entity from every index, the store is left untouched.
    ///
    /// Keys pointing at another instance are left untouched.
    pub fn remove(&self, entity: &Shared<E>) {
        self.unregister(entity);
    }

    /// Remove the entity from every index and enqueue the deletion of its document.
    ///
    /// The entity is marked deleted, later saves of it are ignored.
    pub fn delete(&self, entity: &Shared<E>) {
        let (id, seq) = self.unregister(entity);
        let ack = Ack::Deleted {
            tombstones: self.tombstones.clone(),
            id,
            seq,
        };
        entity.write().entity_mut().delete_document(Some(ack));
    }

    fn unregister(&self, entity: &Shared<E>) -> (String, u64) {
        let id = entity.read().entity().id().to_string();
        // Buried before leaving the id index, a concurrent load sees one or the other.
        let seq = self.tombstones.bury(id.clone());

        for (field, key) in self.keys(entity) {
            if let Some(index) = self.indices.get(field) {
                index.remove_if(&key, |_, cached| Arc::ptr_eq(cached, entity));
            }
        }

        (id, seq)
    }

    /// Move the entity from its previous key to its current key in one index.
    pub fn rekey(&self, entity: &Shared<E>, field: &str, old_key: &str) {
        let Some(index) = self.indices.get(field) else {
            return;
        };

        index.remove_if(old_key, |_, cached| Arc::ptr_eq(cached, entity));

        let key = entity.read().index_key(field);
        if let Some(key) = key {
            index.insert(key, entity.clone());
        }
    }

    /// `true` if exactly this instance is registered under its identifier.
    pub fn is_registered(&self, entity: &Shared<E>) -> bool {
        let id = entity.read().entity().id().to_string();
        self.lookup(ID_FIELD, &id)
            .is_some_and(|cached| Arc::ptr_eq(&cached, entity))
    }

    /// All cached entities.
    pub fn all(&self) -> Vec<Shared<E>> {
        self.indices
            .get(ID_FIELD)
            .map(|index| index.iter().map(|entity| entity.value().clone()).collect())
            .unwrap_or_default()
    }

    /// All cached entities flagged dirty.
    pub fn dirty(&self) -> Vec<Shared<E>> {
        self.all()
            .into_iter()
            .filter(|entity| entity.read().entity().is_dirty())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.indices.get(ID_FIELD).map_or(0, |index| index.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn decode(&self, document: Document) -> Result<E, CacheError> {
        let snapshot = from_document::<E::Snapshot>(document)
            .map_err(|err| CacheError::Decode(self.collection.name().to_string(), err))?;
        Ok(E::hydrate(self.collection.clone(), snapshot))
    }

    /// Register a hydrated entity unless another instance with the same identifier is already
    /// live, in which case that instance is returned and the hydrated copy dropped.
    ///
    /// `released` is the tombstone release count observed before the entity was loaded.
    fn adopt(&self, entity: E, released: u64) -> Adoption<E> {
        let id = entity.entity().id().to_string();

        let adopted = match self.indices.get(ID_FIELD) {
            Some(index) => match index.entry(id) {
                Entry::Occupied(entry) => return Adoption::Live(entry.get().clone()),
                Entry::Vacant(entry) => {
                    if self.tombstones.contains(entry.key()) {
                        return Adoption::Removed;
                    }
                    if self.tombstones.released() != released {
                        return Adoption::Stale;
                    }
                    entry.insert(Arc::new(RwLock::new(entity))).clone()
                }
            },
            None => Arc::new(RwLock::new(entity)),
        };

        for (field, key) in self.keys(&adopted) {
            if field == ID_FIELD {
                continue;
            }
            if let Some(index) = self.indices.get(field) {
                index.insert(key, adopted.clone());
            }
        }

        Adoption::Live(adopted)
    }

    fn keys(&self, entity: &Shared<E>) -> Vec<(&'static str, String)> {
        let entity = entity.read();
        E::INDICES
            .iter()
            .filter_map(|field| entity.index_key(field).map(|key| (*field, key)))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    /// The store could not be reached while looking up an entity.
    #[error("document store unavailable: {0}")]
    StoreUnavailable(Box<dyn Error + Send + Sync>),

    /// A stored document of the given collection does not match the entity's snapshot format.
    #[error("could not decode document of '{0}': {1}")]
    Decode(String, DocumentError),

    /// The entity kind has no index for the requested field.
    #[error("entities are not indexed by '{0}'")]
    UnknownIndex(String),
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use serde::{Deserialize, Serialize};
    use warden_core::{Identifier, NodeSet};

    use crate::entity::{Collection, Entity, ID_FIELD, Persist};
    use crate::memory::MemoryStore;
    use crate::queue::WriteQueue;

    use super::{CacheError, EntityCache, Tombstones};

    /// Chat channel with an optional invite code.
    #[derive(Debug)]
    struct Channel {
        entity: Entity,
        name: String,
        invite: Option<String>,
    }

    #[derive(Serialize, Deserialize)]
    struct ChannelSnapshot {
        id: Identifier,
        name: String,
        invite: Option<String>,
        nodes: NodeSet,
    }

    impl Persist for Channel {
        type Snapshot = ChannelSnapshot;

        const INDICES: &'static [&'static str] = &[ID_FIELD, "name", "invite"];

        fn entity(&self) -> &Entity {
            &self.entity
        }

        fn entity_mut(&mut self) -> &mut Entity {
            &mut self.entity
        }

        fn index_key(&self, field: &str) -> Option<String> {
            match field {
                ID_FIELD => Some(self.entity.id().to_string()),
                "name" => Some(self.name.clone()),
                "invite" => self.invite.clone(),
                _ => None,
            }
        }

        fn snapshot(&self) -> ChannelSnapshot {
            ChannelSnapshot {
                id: self.entity.id(),
                name: self.name.clone(),
                invite: self.invite.clone(),
                nodes: self.entity.nodes().clone(),
            }
        }

        fn hydrate(collection: Collection, snapshot: ChannelSnapshot) -> Self {
            Self {
                entity: Entity::hydrate(snapshot.id, collection, snapshot.nodes),
                name: snapshot.name,
                invite: snapshot.invite,
            }
        }
    }

    fn setup() -> (MemoryStore, WriteQueue, EntityCache<MemoryStore, Channel>) {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 2);
        let cache = EntityCache::new(store.clone(), Collection::new("channels", queue.clone()));
        (store, queue, cache)
    }

    fn channel(cache: &EntityCache<MemoryStore, Channel>, name: &str) -> Channel {
        Channel {
            entity: Entity::new(cache.collection().clone()),
            name: name.to_string(),
            invite: None,
        }
    }

    #[tokio::test]
    async fn every_index_points_at_the_same_instance() {
        let (store, queue, cache) = setup();

        let mut global = channel(&cache, "global");
        global.invite = Some("abc".into());
        global.entity_mut().nodes_mut().set("chat.speak", true).unwrap();
        let id = global.entity().id().to_string();
        global.save();
        queue.flush().await;

        // A second cache over the same store starts cold.
        let cold = EntityCache::<MemoryStore, Channel>::new(
            store.clone(),
            Collection::new("channels", queue.clone()),
        );

        let by_name = cold.get("name", "global").await.unwrap().unwrap();
        assert_eq!(store.find_count(), 1);

        let by_id = cold.get(ID_FIELD, &id).await.unwrap().unwrap();
        let by_invite = cold.get("invite", "abc").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&by_name, &by_id));
        assert!(Arc::ptr_eq(&by_name, &by_invite));

        // Served from memory after the first load.
        assert_eq!(store.find_count(), 1);
        assert_eq!(by_id.read().entity().nodes().exact("chat.speak"), Some(true));
        assert!(cold.is_registered(&by_id));
        assert_eq!(cold.len(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn misses_are_not_cached() {
        let (store, _queue, cache) = setup();

        assert!(cache.get("name", "missing").await.unwrap().is_none());
        assert!(cache.get("name", "missing").await.unwrap().is_none());
        assert_eq!(store.find_count(), 2);

        assert_matches!(
            cache.get("topic", "x").await,
            Err(CacheError::UnknownIndex(field)) if field == "topic"
        );
    }

    #[tokio::test]
    async fn transport_failures_are_not_misses() {
        let (store, _queue, cache) = setup();
        store.set_available(false);

        assert_matches!(
            cache.get("name", "global").await,
            Err(CacheError::StoreUnavailable(_))
        );
        assert_matches!(cache.load_all().await, Err(CacheError::StoreUnavailable(_)));
    }

    #[tokio::test]
    async fn register_remove_and_rekey() {
        let (_store, _queue, cache) = setup();

        let mut value = channel(&cache, "trade");
        value.invite = Some("xyz".into());
        let trade = cache.insert(value);
        let id = trade.read().entity().id().to_string();

        assert!(Arc::ptr_eq(&cache.lookup("name", "trade").unwrap(), &trade));
        assert!(Arc::ptr_eq(&cache.lookup("invite", "xyz").unwrap(), &trade));

        // Registering again overwrites instead of duplicating.
        cache.register(&trade);
        assert_eq!(cache.len(), 1);

        trade.write().name = "market".into();
        cache.rekey(&trade, "name", "trade");
        assert!(cache.lookup("name", "trade").is_none());
        assert!(Arc::ptr_eq(&cache.lookup("name", "market").unwrap(), &trade));

        cache.remove(&trade);
        assert!(cache.lookup(ID_FIELD, &id).is_none());
        assert!(cache.lookup("name", "market").is_none());
        assert!(cache.lookup("invite", "xyz").is_none());
        assert!(!cache.is_registered(&trade));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn removed_entities_are_not_loaded_again() {
        let (_store, queue, cache) = setup();
        channel(&cache, "offtopic").save();
        queue.flush().await;

        let offtopic = cache.get("name", "offtopic").await.unwrap().unwrap();
        cache.remove(&offtopic);

        // The store still holds the document, its deletion was never enqueued.
        assert!(cache.get("name", "offtopic").await.unwrap().is_none());
        assert!(cache.load_all().await.unwrap().is_empty());

        // Explicit registration brings it back.
        cache.register(&offtopic);
        assert!(cache.get("name", "offtopic").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn deleted_entities_drop_their_tombstone_once_confirmed() {
        let (store, queue, cache) = setup();
        let general = cache.insert(channel(&cache, "general"));
        general.read().save();
        queue.flush().await;
        let id = general.read().entity().id().to_string();

        // The deletion can not reach the store yet, the tombstone keeps the entity out.
        store.set_available(false);
        cache.delete(&general);
        assert!(general.read().entity().is_deleted());
        queue.flush().await;
        store.set_available(true);

        assert!(cache.tombstones.contains(&id));
        assert_eq!(store.documents("channels").len(), 1);
        assert!(cache.get("name", "general").await.unwrap().is_none());

        // Saves after the deletion are ignored, deleting again goes through.
        general.read().save();
        cache.delete(&general);
        queue.flush().await;

        assert!(store.documents("channels").is_empty());
        assert!(!cache.tombstones.contains(&id));
        assert!(cache.get(ID_FIELD, &id).await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn releases_only_drop_the_latest_removal() {
        let tombstones = Tombstones::default();
        let id = Identifier::random().to_string();

        let first = tombstones.bury(id.clone());
        let second = tombstones.bury(id.clone());
        tombstones.release(&id, first);
        assert!(tombstones.contains(&id));
        assert_eq!(tombstones.released(), 1);

        tombstones.release(&id, second);
        assert!(!tombstones.contains(&id));
    }

    #[tokio::test]
    async fn concurrent_loads_yield_one_instance() {
        let (store, queue, cache) = setup();
        let value = channel(&cache, "global");
        value.save();
        queue.flush().await;

        let cold = Arc::new(EntityCache::<MemoryStore, Channel>::new(
            store,
            Collection::new("channels", queue),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cold = cold.clone();
            handles.push(tokio::spawn(async move {
                cold.get("name", "global").await.unwrap().unwrap()
            }));
        }

        let mut loaded = Vec::new();
        for handle in handles {
            loaded.push(handle.await.unwrap());
        }

        let first = cold.lookup("name", "global").unwrap();
        for entity in loaded {
            assert!(Arc::ptr_eq(&entity, &first));
        }
        assert_eq!(cold.len(), 1);
    }

    #[tokio::test]
    async fn load_all_and_dirty() {
        let (_store, queue, cache) = setup();
        for name in ["a", "b", "c"] {
            channel(&cache, name).save();
        }
        queue.flush().await;

        let loaded = cache.load_all().await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(cache.all().len(), 3);
        assert!(cache.dirty().is_empty());

        loaded[0].read().entity().mark_dirty();
        assert_eq!(cache.dirty().len(), 1);
    }
}
