// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::document::Document;

/// Interface to a schemaless store holding documents in named collections.
///
/// Documents are looked up by comparing the string form of one of their fields against a key (see
/// [`field_key`](crate::field_key)). Implementations are cheap to clone, every clone talks to the
/// same underlying storage.
pub trait DocumentStore: Clone + Send + Sync + 'static {
    type Error: Error + Send + Sync + 'static;

    /// All documents of a collection where `field` equals `key`.
    fn find(
        &self,
        collection: &str,
        field: &str,
        key: &str,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send;

    /// All documents of a collection.
    fn find_all(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send;

    /// Insert the document or fully replace all documents with the same value in `field`.
    fn upsert(
        &self,
        collection: &str,
        field: &str,
        document: Document,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Delete all documents of a collection where `field` equals `key`.
    ///
    /// Returns `true` when at least one document was removed.
    fn delete(
        &self,
        collection: &str,
        field: &str,
        key: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>> + Send;
}
