// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use thiserror::Error;

use crate::document::{Document, field_key};
use crate::traits::DocumentStore;

/// In-memory document store.
///
/// This does not persist data permanently, all changes are lost when the process ends. Use this
/// only in development or test contexts.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<String, Vec<Document>>>>,
    unavailable: Arc<AtomicBool>,
    finds: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of all documents currently held in a collection, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    /// Simulate a transport failure, every call fails until the store is made available again.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Number of `find` calls the store received so far.
    #[cfg(any(test, feature = "test_utils"))]
    pub fn find_count(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), MemoryStoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MemoryStoreError::Unavailable);
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    type Error = MemoryStoreError;

    async fn find(
        &self,
        collection: &str,
        field: &str,
        key: &str,
    ) -> Result<Vec<Document>, Self::Error> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;

        let collections = self.collections.read();
        let Some(documents) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        Ok(documents
            .iter()
            .filter(|document| field_key(document, field).as_deref() == Some(key))
            .cloned()
            .collect())
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, Self::Error> {
        self.check_available()?;
        Ok(self.documents(collection))
    }

    async fn upsert(
        &self,
        collection: &str,
        field: &str,
        document: Document,
    ) -> Result<(), Self::Error> {
        self.check_available()?;

        let key = field_key(&document, field)
            .ok_or_else(|| MemoryStoreError::MissingKey(field.to_string()))?;

        let mut collections = self.collections.write();
        let documents = collections.entry(collection.to_string()).or_default();
        documents.retain(|existing| field_key(existing, field).as_deref() != Some(key.as_str()));
        documents.push(document);

        Ok(())
    }

    async fn delete(&self, collection: &str, field: &str, key: &str) -> Result<bool, Self::Error> {
        self.check_available()?;

        let mut collections = self.collections.write();
        let Some(documents) = collections.get_mut(collection) else {
            return Ok(false);
        };

        let before = documents.len();
        documents.retain(|existing| field_key(existing, field).as_deref() != Some(key));
        Ok(documents.len() < before)
    }
}

#[derive(Debug, Error)]
pub enum MemoryStoreError {
    /// Store was switched off, see `MemoryStore::set_available`.
    #[error("memory store is unavailable")]
    Unavailable,

    /// Document handed in for an upsert does not carry the key field.
    #[error("document is missing key field '{0}'")]
    MissingKey(String),
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::document::Document;
    use crate::traits::DocumentStore;

    use super::{MemoryStore, MemoryStoreError};

    fn document(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(document) => document,
            _ => panic!("expected object"),
        }
    }

    #[tokio::test]
    async fn upsert_replaces_by_field() {
        let store = MemoryStore::new();
        store
            .upsert("groups", "id", document(json!({ "id": "1", "name": "a" })))
            .await
            .unwrap();
        store
            .upsert("groups", "id", document(json!({ "id": "2", "name": "b" })))
            .await
            .unwrap();
        store
            .upsert("groups", "id", document(json!({ "id": "1", "name": "c" })))
            .await
            .unwrap();

        let found = store.find("groups", "id", "1").await.unwrap();
        assert_eq!(found, vec![document(json!({ "id": "1", "name": "c" }))]);
        assert_eq!(store.find("groups", "name", "b").await.unwrap().len(), 1);
        assert_eq!(store.find_all("groups").await.unwrap().len(), 2);
        assert!(store.find("users", "id", "1").await.unwrap().is_empty());

        assert!(store.delete("groups", "id", "1").await.unwrap());
        assert!(!store.delete("groups", "id", "1").await.unwrap());
        assert_eq!(store.documents("groups").len(), 1);

        assert_matches!(
            store.upsert("groups", "id", document(json!({ "name": "x" }))).await,
            Err(MemoryStoreError::MissingKey(field)) if field == "id"
        );
    }

    #[tokio::test]
    async fn unavailable_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert_matches!(
            store.find("groups", "id", "1").await,
            Err(MemoryStoreError::Unavailable)
        );
        assert_matches!(
            store
                .upsert("groups", "id", document(json!({ "id": "1" })))
                .await,
            Err(MemoryStoreError::Unavailable)
        );
        assert_eq!(store.find_count(), 1);

        store.set_available(true);
        assert!(store.find("groups", "id", "1").await.unwrap().is_empty());
    }
}
