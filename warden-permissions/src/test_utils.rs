// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers for tests of crates depending on the permission service.
use warden_store::MemoryStore;

use crate::{Config, PermissionError, PermissionService};

/// Install a log subscriber when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Permission service over a fresh in-memory store.
pub async fn memory_service()
-> Result<(MemoryStore, PermissionService<MemoryStore>), PermissionError> {
    setup_logging();
    let store = MemoryStore::new();
    let service = PermissionService::start(store.clone(), Config::default()).await?;
    Ok((store, service))
}
