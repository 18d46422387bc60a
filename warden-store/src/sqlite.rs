// SPDX-License-Identifier: MIT OR Apache-2.0

//! Document store on top of a SQLite database.
//!
//! Every document is kept as JSON text in one table, field lookups go through `json_extract`.
use std::sync::Arc;

use serde_json::Value;
use sqlx::migrate::{MigrateDatabase, Migrator};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, Sqlite, migrate, query, query_as};
use thiserror::Error;
use tokio::sync::Semaphore;

use crate::document::{Document, field_key};
use crate::traits::DocumentStore;

/// Create SQLite database if it doesn't already exist.
pub async fn create_database(url: &str) -> Result<(), SqliteError> {
    if !Sqlite::database_exists(url).await? {
        Sqlite::create_database(url).await?
    }
    Ok(())
}

/// Get migrations from folder without running them.
pub fn migrations() -> Migrator {
    migrate!()
}

/// Run any pending database migrations from inside the application.
pub async fn run_pending_migrations(pool: &sqlx::SqlitePool) -> Result<(), SqliteError> {
    migrations().run(pool).await?;
    Ok(())
}

pub struct SqliteStoreBuilder {
    url: String,
    max_connections: u32,
    run_migrations: bool,
    create_database: bool,
}

impl Default for SqliteStoreBuilder {
    fn default() -> Self {
        Self {
            url: "sqlite::memory:".into(),
            max_connections: 16,
            create_database: true,
            run_migrations: true,
        }
    }
}

impl SqliteStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(any(test, feature = "test_utils"))]
    pub fn random_memory_url(mut self) -> Self {
        // Every temporary database gets a random name, in-memory databases shared between tests
        // running in the same process would otherwise see each other's data.
        self.url = format!(
            "sqlite://dbmem{}?mode=memory&cache=private",
            rand::random::<u32>()
        );
        self
    }

    pub fn database_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    pub fn max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn create_database(mut self, create_database: bool) -> Self {
        self.create_database = create_database;
        self
    }

    pub fn run_default_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    pub async fn build(self) -> Result<SqliteStore, SqliteError> {
        if self.create_database {
            create_database(&self.url).await?;
        }

        let pool: sqlx::SqlitePool = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.url)
            .await?;

        if self.run_migrations {
            run_pending_migrations(&pool).await?;
        }

        Ok(SqliteStore::new(pool))
    }
}

/// SQLite document store with connection pool.
///
/// This struct can be cloned and used in multiple places in the application, every clone re-uses
/// the same connection pool. Writes run inside transactions which are strictly serialized, reads
/// go to the pool directly.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
    semaphore: Arc<Semaphore>,
}

impl SqliteStore {
    pub(crate) fn new(pool: sqlx::SqlitePool) -> Self {
        Self {
            pool,
            // SQLite only ever allows one writing transaction at a time.
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Shortcut building an in-memory SQLite database with a randomised name for testing purposes.
    #[cfg(any(test, feature = "test_utils"))]
    pub async fn temporary() -> Self {
        SqliteStoreBuilder::new()
            .random_memory_url()
            .max_connections(1)
            .build()
            .await
            .expect("migrations succeeded")
    }
}

impl DocumentStore for SqliteStore {
    type Error = SqliteError;

    async fn find(
        &self,
        collection: &str,
        field: &str,
        key: &str,
    ) -> Result<Vec<Document>, Self::Error> {
        let rows = query_as::<_, DocumentRow>(
            "
            SELECT
                body
            FROM
                documents_v1
            WHERE
                collection = ?
                AND CAST(json_extract(body, ?) AS TEXT) = ?
            ORDER BY
                rowid
            ",
        )
        .bind(collection)
        .bind(json_path(field))
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Document::try_from).collect()
    }

    async fn find_all(&self, collection: &str) -> Result<Vec<Document>, Self::Error> {
        let rows = query_as::<_, DocumentRow>(
            "
            SELECT
                body
            FROM
                documents_v1
            WHERE
                collection = ?
            ORDER BY
                rowid
            ",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Document::try_from).collect()
    }

    async fn upsert(
        &self,
        collection: &str,
        field: &str,
        document: Document,
    ) -> Result<(), Self::Error> {
        let key = field_key(&document, field)
            .ok_or_else(|| SqliteError::MissingKey(field.to_string()))?;
        let body = serde_json::to_string(&document)
            .map_err(|err| SqliteError::Encode(collection.to_string(), err))?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SqliteError::Closed)?;
        let mut tx = self.pool.begin().await?;

        let updated = query(
            "
            UPDATE
                documents_v1
            SET
                body = ?
            WHERE
                collection = ?
                AND CAST(json_extract(body, ?) AS TEXT) = ?
            ",
        )
        .bind(&body)
        .bind(collection)
        .bind(json_path(field))
        .bind(&key)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            query(
                "
                INSERT INTO
                    documents_v1 (
                        collection,
                        body
                    )
                VALUES
                    (?, ?)
                ",
            )
            .bind(collection)
            .bind(&body)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, field: &str, key: &str) -> Result<bool, Self::Error> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SqliteError::Closed)?;

        let result = query(
            "
            DELETE FROM
                documents_v1
            WHERE
                collection = ?
                AND CAST(json_extract(body, ?) AS TEXT) = ?
            ",
        )
        .bind(collection)
        .bind(json_path(field))
        .bind(key)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// JSON path selecting a top-level field, quoted so field names may contain dots.
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', "\\\""))
}

#[derive(FromRow)]
struct DocumentRow {
    body: String,
}

impl TryFrom<DocumentRow> for Document {
    type Error = SqliteError;

    fn try_from(row: DocumentRow) -> Result<Self, Self::Error> {
        match serde_json::from_str(&row.body)
            .map_err(|err| SqliteError::Decode("body".to_string(), err))?
        {
            Value::Object(document) => Ok(document),
            _ => Err(SqliteError::NotAnObject),
        }
    }
}

#[derive(Debug, Error)]
pub enum SqliteError {
    /// SQLite database and connection error.
    #[error(transparent)]
    Sqlite(#[from] sqlx::Error),

    /// SQL table schema migration error.
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// Document could not be encoded before storing it into the database. This is a critical
    /// error.
    #[error("failed encoding document of '{0}' before storing to database: {1}")]
    Encode(String, serde_json::Error),

    /// Invalid, corrupted data was found in the database. This is a critical error.
    #[error("could not decode corrupted '{0}' value from database: {1}")]
    Decode(String, serde_json::Error),

    /// Stored body is valid JSON but not an object.
    #[error("stored document is not a JSON object")]
    NotAnObject,

    /// Document handed in for an upsert does not carry the key field.
    #[error("document is missing key field '{0}'")]
    MissingKey(String),

    /// Store was shut down while waiting for a write permit.
    #[error("sqlite store was closed")]
    Closed,
}
