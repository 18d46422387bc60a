// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;
use warden_core::{Identifier, NodeError, PrincipalError, PrincipalId};
use warden_store::CacheError;

/// Errors returned by the permission service.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// Invalid input, the call had no effect.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The call operated on an entity which is not (or no longer) registered or on the protected
    /// default group.
    #[error(transparent)]
    IllegalState(#[from] IllegalStateError),

    /// The call referred to something which conflicts with existing state.
    #[error(transparent)]
    IllegalArgument(#[from] IllegalArgumentError),

    /// Assigning the parent would make the group its own ancestor.
    #[error("setting {parent} as parent of {group} would create a cycle")]
    Cycle { group: Identifier, parent: Identifier },

    /// The document store could not be reached or returned corrupted data.
    #[error(transparent)]
    StoreUnavailable(#[from] CacheError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("group name must not be empty")]
    EmptyName,

    #[error("a group named '{0}' already exists")]
    DuplicateName(String),

    #[error(transparent)]
    Principal(#[from] PrincipalError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IllegalStateError {
    #[error("{0} {1} is not registered")]
    NotRegistered(&'static str, Identifier),

    #[error("the default group can not be deleted or get a parent")]
    DefaultGroupProtected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IllegalArgumentError {
    #[error("a permission user for principal '{0}' already exists")]
    UserExists(PrincipalId),
}

/// Errors returned by the player directory.
#[derive(Debug, Error)]
pub enum PlayerError {
    /// Another player is linked to the platform account already.
    #[error("steam id '{steam_id}' is already linked to player {holder}")]
    SteamIdTaken { steam_id: String, holder: Identifier },

    #[error(transparent)]
    StoreUnavailable(#[from] CacheError),
}

impl From<NodeError> for PermissionError {
    fn from(value: NodeError) -> Self {
        Self::Validation(value.into())
    }
}

impl From<PrincipalError> for PermissionError {
    fn from(value: PrincipalError) -> Self {
        Self::Validation(value.into())
    }
}
