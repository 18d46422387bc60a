// SPDX-License-Identifier: MIT OR Apache-2.0

use serde::{Deserialize, Serialize};
use warden_core::{Identifier, NodeSet, PrincipalId};
use warden_store::{Collection, Entity, ID_FIELD, Persist};

/// Index field holding the principal a user stands for.
pub const PRINCIPAL_FIELD: &str = "principal_id";

/// Permission state of a single principal: own node overrides and an optional group.
#[derive(Debug)]
pub struct PermissionUser {
    entity: Entity,
    principal: PrincipalId,
    group: Option<Identifier>,
}

impl PermissionUser {
    pub(crate) fn new(collection: Collection, principal: PrincipalId) -> Self {
        Self {
            entity: Entity::new(collection),
            principal,
            group: None,
        }
    }

    pub fn id(&self) -> Identifier {
        self.entity.id()
    }

    pub fn principal(&self) -> &PrincipalId {
        &self.principal
    }

    /// Assigned group, users without one resolve against the default group.
    pub fn group(&self) -> Option<Identifier> {
        self.group
    }

    pub fn nodes(&self) -> &NodeSet {
        self.entity.nodes()
    }

    pub(crate) fn set_group(&mut self, group: Option<Identifier>) {
        self.group = group;
    }
}

/// Stored form of a permission user.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: Identifier,
    pub principal_id: PrincipalId,
    pub group_id: Option<Identifier>,
    #[serde(default)]
    pub nodes: NodeSet,
}

impl Persist for PermissionUser {
    type Snapshot = UserSnapshot;

    const INDICES: &'static [&'static str] = &[ID_FIELD, PRINCIPAL_FIELD];

    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    fn index_key(&self, field: &str) -> Option<String> {
        match field {
            ID_FIELD => Some(self.id().to_string()),
            PRINCIPAL_FIELD => Some(self.principal.to_string()),
            _ => None,
        }
    }

    fn snapshot(&self) -> UserSnapshot {
        UserSnapshot {
            id: self.id(),
            principal_id: self.principal.clone(),
            group_id: self.group,
            nodes: self.entity.nodes().clone(),
        }
    }

    fn hydrate(collection: Collection, snapshot: UserSnapshot) -> Self {
        Self {
            entity: Entity::hydrate(snapshot.id, collection, snapshot.nodes),
            principal: snapshot.principal_id,
            group: snapshot.group_id,
        }
    }
}
