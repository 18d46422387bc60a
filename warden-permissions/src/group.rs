// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use warden_core::{Identifier, NodeSet};
use warden_store::{Collection, Entity, ID_FIELD, Persist};

/// Index field holding the lower-cased group name.
pub const NAME_KEY_FIELD: &str = "name_key";

/// Named group of users with inheritable node flags.
///
/// Groups form a forest through their parent references. Members are not stored with the group,
/// they are derived from the group assignment of each user when the service starts.
#[derive(Debug)]
pub struct PermissionGroup {
    entity: Entity,
    name: String,
    parent: Option<Identifier>,
    members: BTreeSet<Identifier>,
}

impl PermissionGroup {
    pub(crate) fn new(collection: Collection, name: &str) -> Self {
        Self {
            entity: Entity::new(collection),
            name: name.to_string(),
            parent: None,
            members: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> Identifier {
        self.entity.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive form of the name, unique among all groups.
    pub fn name_key(&self) -> String {
        name_key(&self.name)
    }

    pub fn parent(&self) -> Option<Identifier> {
        self.parent
    }

    pub fn members(&self) -> &BTreeSet<Identifier> {
        &self.members
    }

    pub fn has_member(&self, user: Identifier) -> bool {
        self.members.contains(&user)
    }

    pub fn nodes(&self) -> &NodeSet {
        self.entity.nodes()
    }

    pub(crate) fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub(crate) fn set_parent(&mut self, parent: Option<Identifier>) {
        self.parent = parent;
    }

    pub(crate) fn insert_member(&mut self, user: Identifier) -> bool {
        self.members.insert(user)
    }

    pub(crate) fn remove_member(&mut self, user: Identifier) -> bool {
        self.members.remove(&user)
    }
}

pub(crate) fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Stored form of a permission group.
#[derive(Debug, Serialize, Deserialize)]
pub struct GroupSnapshot {
    pub id: Identifier,
    pub name: String,
    pub name_key: String,
    pub parent_id: Option<Identifier>,
    #[serde(default)]
    pub nodes: NodeSet,
}

impl Persist for PermissionGroup {
    type Snapshot = GroupSnapshot;

    const INDICES: &'static [&'static str] = &[ID_FIELD, NAME_KEY_FIELD];

    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    fn index_key(&self, field: &str) -> Option<String> {
        match field {
            ID_FIELD => Some(self.id().to_string()),
            NAME_KEY_FIELD => Some(self.name_key()),
            _ => None,
        }
    }

    fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id(),
            name: self.name.clone(),
            name_key: self.name_key(),
            parent_id: self.parent,
            nodes: self.entity.nodes().clone(),
        }
    }

    fn hydrate(collection: Collection, snapshot: GroupSnapshot) -> Self {
        Self {
            entity: Entity::hydrate(snapshot.id, collection, snapshot.nodes),
            name: snapshot.name,
            parent: snapshot.parent_id,
            members: BTreeSet::new(),
        }
    }
}
