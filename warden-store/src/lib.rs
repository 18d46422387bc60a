// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence and caching of node-bearing entities.
//!
//! Entities live in memory and are the source of truth while the process runs, the document
//! store is only used to restore them after a restart. All writes go through a [`WriteQueue`]
//! which applies them in the background without blocking the caller while keeping the order of
//! writes to the same document. Reads go through an [`EntityCache`] which loads entities from the
//! store on first access and keeps one live instance per entity, reachable from all its indices.
//!
//! Two [`DocumentStore`] implementations are provided: an in-memory [`MemoryStore`] for tests and
//! development and a SQLite backed store behind the `sqlite` feature.
mod cache;
mod document;
mod entity;
mod memory;
mod queue;
#[cfg(feature = "sqlite")]
pub mod sqlite;
mod traits;

pub use cache::{CacheError, EntityCache, Shared};
pub use document::{Document, DocumentError, field_key, from_document, to_document};
pub use entity::{Collection, Entity, ID_FIELD, Persist};
pub use memory::{MemoryStore, MemoryStoreError};
pub use queue::{DEFAULT_WORKERS, WriteQueue};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteError, SqliteStore, SqliteStoreBuilder};
pub use traits::DocumentStore;
