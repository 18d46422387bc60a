// SPDX-License-Identifier: MIT OR Apache-2.0

//! Permission groups, users and node resolution.
//!
//! Groups carry node flags and form a forest through optional parent references, below one
//! distinguished default group which always exists and can not be deleted. Users stand for an
//! external principal, carry their own node flags and are optionally assigned to one group.
//!
//! A permission query for a principal is answered by the first applicable entry found when
//! asking, in this order: the user's own nodes, the user's group, the ancestors of that group and
//! finally the default group. Without any entry the node is denied.
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use warden_core::PrincipalId;
//! use warden_permissions::{Config, PermissionService, Target};
//! use warden_store::MemoryStore;
//!
//! let service = PermissionService::start(MemoryStore::new(), Config::default()).await?;
//!
//! let admins = service.create_group("Admins").await?;
//! service.set_permission(Target::Group(&admins), "server.kick", true, true)?;
//!
//! let principal = PrincipalId::new("steam:123")?;
//! let user = service.create_user(principal.clone()).await?;
//! assert!(!service.has_permission(&principal, "server.kick").await?);
//!
//! service.add_member(&admins, &user).await?;
//! assert!(service.has_permission(&principal, "server.kick").await?);
//! assert!(service.has_any_permission(&principal, "server").await?);
//! assert!(!service.has_permission(&principal, "server.ban").await?);
//! # Ok(())
//! # }
//! ```
mod config;
mod error;
mod group;
mod player;
mod service;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod user;

pub use config::{
    Config, DEFAULT_GROUP_NAME, DEFAULT_GROUPS_COLLECTION, DEFAULT_PLAYERS_COLLECTION,
    DEFAULT_USERS_COLLECTION,
};
pub use error::{
    IllegalArgumentError, IllegalStateError, PermissionError, PlayerError, ValidationError,
};
pub use group::{GroupSnapshot, NAME_KEY_FIELD, PermissionGroup};
pub use player::{
    PlayerDirectory, PlayerRecord, PlayerSnapshot, PrincipalDirectory, STEAM_ID_FIELD,
    USERNAME_FIELD,
};
pub use service::{PermissionService, Target};
pub use user::{PRINCIPAL_FIELD, PermissionUser, UserSnapshot};
