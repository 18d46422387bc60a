// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group and user lifecycle and permission resolution.
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use warden_core::{FlagChange, Identifier, NodeSet, PrincipalId, Query, normalize_path};
use warden_store::{
    Collection, DocumentStore, EntityCache, ID_FIELD, Persist, Shared, WriteQueue,
};

use crate::config::Config;
use crate::error::{IllegalArgumentError, IllegalStateError, PermissionError, ValidationError};
use crate::group::{NAME_KEY_FIELD, PermissionGroup, name_key};
use crate::player::PlayerDirectory;
use crate::user::{PRINCIPAL_FIELD, PermissionUser};

/// Entity a node flag is set on.
#[derive(Clone, Copy, Debug)]
pub enum Target<'a> {
    Group(&'a Shared<PermissionGroup>),
    User(&'a Shared<PermissionUser>),
}

/// Facade over permission groups and users.
///
/// The service is created once at process start and handed to everything that needs to check or
/// change permissions. Cloning it is cheap, all clones share the same state.
///
/// Every mutation touching group or user links (creating, deleting, re-parenting, moving members)
/// is serialized, resolution never waits for mutations.
pub struct PermissionService<S> {
    inner: Arc<ServiceInner<S>>,
}

struct ServiceInner<S> {
    config: Config,
    queue: WriteQueue,
    groups: EntityCache<S, PermissionGroup>,
    users: EntityCache<S, PermissionUser>,
    players: PlayerDirectory<S>,
    default_group: Shared<PermissionGroup>,
    mutation: Mutex<()>,
}

impl<S> std::fmt::Debug for PermissionService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionService").finish_non_exhaustive()
    }
}

impl<S> Clone for PermissionService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: DocumentStore> PermissionService<S> {
    /// Spawn the write queue, load all groups and users from the store and make sure the default
    /// group exists.
    ///
    /// Dangling references found in the store are repaired. Failing to reach the store is fatal.
    pub async fn start(store: S, config: Config) -> Result<Self, PermissionError> {
        let queue = WriteQueue::spawn(store.clone(), config.write_workers);

        let groups: EntityCache<S, PermissionGroup> = EntityCache::new(
            store.clone(),
            Collection::new(&config.groups_collection, queue.clone()),
        );
        let users: EntityCache<S, PermissionUser> = EntityCache::new(
            store.clone(),
            Collection::new(&config.users_collection, queue.clone()),
        );
        let players = PlayerDirectory::new(
            store,
            Collection::new(&config.players_collection, queue.clone()),
        );

        let loaded_groups = groups.load_all().await?;
        let loaded_users = users.load_all().await?;

        let default_key = name_key(&config.default_group);
        let default_group = match groups.lookup(NAME_KEY_FIELD, &default_key) {
            Some(group) => group,
            None => {
                let group = groups.insert(PermissionGroup::new(
                    groups.collection().clone(),
                    config.default_group.trim(),
                ));
                group.read().save();
                debug!(name = %config.default_group, "created default group");
                group
            }
        };

        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                queue,
                groups,
                users,
                players,
                default_group,
                mutation: Mutex::new(()),
            }),
        };

        service.repair_groups(&loaded_groups);
        service.link_users(&loaded_users);

        debug!(
            groups = service.inner.groups.len(),
            users = service.inner.users.len(),
            "permission service started"
        );

        Ok(service)
    }

    /// Detach groups whose parent is missing or which are part of a parent cycle.
    fn repair_groups(&self, loaded: &[Shared<PermissionGroup>]) {
        let default_group = &self.inner.default_group;
        if default_group.read().parent().is_some() {
            warn!("default group had a parent, detaching it");
            default_group.write().set_parent(None);
            default_group.read().save();
        }

        for group in loaded {
            let (id, parent) = {
                let group = group.read();
                (group.id(), group.parent())
            };
            let Some(parent) = parent else {
                continue;
            };

            let dangling = self.inner.groups.lookup(ID_FIELD, &parent.to_string()).is_none();
            if dangling || self.ancestors_contain(Some(parent), id) {
                warn!(group = %id, %parent, dangling, "detaching group from invalid parent");
                group.write().set_parent(None);
                group.read().save();
            }
        }
    }

    /// Rebuild member lists from the users' group assignments.
    fn link_users(&self, loaded: &[Shared<PermissionUser>]) {
        for user in loaded {
            let (id, group_id) = {
                let user = user.read();
                (user.id(), user.group())
            };
            let Some(group_id) = group_id else {
                continue;
            };

            match self.inner.groups.lookup(ID_FIELD, &group_id.to_string()) {
                Some(group) => {
                    group.write().insert_member(id);
                }
                None => {
                    warn!(
                        user = %id,
                        group = %group_id,
                        "resetting group of user, group does not exist"
                    );
                    user.write().set_group(None);
                    user.read().save();
                }
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn default_group(&self) -> Shared<PermissionGroup> {
        self.inner.default_group.clone()
    }

    /// Player records and principal directory sharing the service's store and write queue.
    pub fn players(&self) -> &PlayerDirectory<S> {
        &self.inner.players
    }

    pub fn write_queue(&self) -> &WriteQueue {
        &self.inner.queue
    }

    /// Wait until all writes enqueued so far reached the store.
    pub async fn flush(&self) {
        self.inner.queue.flush().await;
    }

    /// Apply all outstanding writes and stop the write queue.
    pub async fn shutdown(&self) {
        self.inner.queue.shutdown().await;
    }

    /// Re-save every cached group and user still flagged dirty.
    ///
    /// Entities deleted while this runs are skipped by their save. Returns the number of dirty
    /// entities found.
    pub fn persist_dirty(&self) -> usize {
        let groups = self.inner.groups.dirty();
        let users = self.inner.users.dirty();

        for group in &groups {
            group.read().save();
        }
        for user in &users {
            user.read().save();
        }

        groups.len() + users.len()
    }

    // Resolution
    // ~~~~~~~~~~

    /// Returns `true` if the node is granted to the principal.
    ///
    /// A node ending in `.*` is a wildcard query, see
    /// [`has_any_permission`](Self::has_any_permission).
    pub async fn has_permission(
        &self,
        principal: &PrincipalId,
        node: &str,
    ) -> Result<bool, PermissionError> {
        self.resolve(principal, &Query::parse(node)).await
    }

    /// Returns `true` if any node equal to or below the prefix is granted to the principal.
    pub async fn has_any_permission(
        &self,
        principal: &PrincipalId,
        prefix: &str,
    ) -> Result<bool, PermissionError> {
        self.resolve(principal, &Query::wildcard(prefix)).await
    }

    /// Answer a query for a principal.
    ///
    /// An applicable entry in the user's own nodes decides alone. Otherwise the user's group and
    /// its ancestors are asked in turn, ending with the default group, the first group with an
    /// applicable entry decides. Without any entry the node is denied. Principals without
    /// permission user resolve against the default group.
    pub async fn resolve(
        &self,
        principal: &PrincipalId,
        query: &Query,
    ) -> Result<bool, PermissionError> {
        let Some(user) = self.get_user(principal).await? else {
            return Ok(self.resolve_chain(None, query));
        };

        let (own, group) = {
            let user = user.read();
            (user.nodes().lookup(query), user.group())
        };

        match own {
            Some(value) => Ok(value),
            None => Ok(self.resolve_chain(group, query)),
        }
    }

    /// Answer a query against a group and its ancestors.
    pub fn resolve_group(&self, group: &Shared<PermissionGroup>, query: &Query) -> bool {
        let id = group.read().id();
        self.resolve_chain(Some(id), query)
    }

    fn resolve_chain(&self, start: Option<Identifier>, query: &Query) -> bool {
        for group in self.chain(start) {
            if let Some(value) = group.read().nodes().lookup(query) {
                return value;
            }
        }
        false
    }

    /// Groups asked during resolution, nearest first.
    ///
    /// Starts at the given group (or the default group) and follows the parents. The default group
    /// always closes the chain, also when the walk ended at another root.
    fn chain(&self, start: Option<Identifier>) -> Vec<Shared<PermissionGroup>> {
        let default_group = &self.inner.default_group;

        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = start.and_then(|id| self.inner.groups.lookup(ID_FIELD, &id.to_string()));

        while let Some(group) = current {
            let (id, parent) = {
                let group = group.read();
                (group.id(), group.parent())
            };
            if !visited.insert(id) {
                break;
            }
            chain.push(group);
            current = parent.and_then(|id| self.inner.groups.lookup(ID_FIELD, &id.to_string()));
        }

        if !chain.iter().any(|group| Arc::ptr_eq(group, default_group)) {
            chain.push(default_group.clone());
        }

        chain
    }

    /// Merged view of all nodes below the prefix as seen by the principal.
    ///
    /// Farther groups are overridden by nearer ones, the user's own nodes override all groups.
    pub async fn effective_nodes(
        &self,
        principal: &PrincipalId,
        prefix: &str,
    ) -> Result<BTreeMap<String, bool>, PermissionError> {
        let user = self.get_user(principal).await?;
        let group = user.as_ref().and_then(|user| user.read().group());

        let mut nodes = BTreeMap::new();
        for group in self.chain(group).iter().rev() {
            for (path, value) in group.read().nodes().below(prefix) {
                nodes.insert(path.to_string(), value);
            }
        }

        if let Some(user) = user {
            for (path, value) in user.read().nodes().below(prefix) {
                nodes.insert(path.to_string(), value);
            }
        }

        Ok(nodes)
    }

    // Groups
    // ~~~~~~

    /// Group by case-insensitive name.
    pub async fn get_group(
        &self,
        name: &str,
    ) -> Result<Option<Shared<PermissionGroup>>, PermissionError> {
        Ok(self.inner.groups.get(NAME_KEY_FIELD, &name_key(name)).await?)
    }

    pub async fn get_group_by_id(
        &self,
        id: Identifier,
    ) -> Result<Option<Shared<PermissionGroup>>, PermissionError> {
        Ok(self.inner.groups.get(ID_FIELD, &id.to_string()).await?)
    }

    /// All registered groups.
    pub fn groups(&self) -> Vec<Shared<PermissionGroup>> {
        self.inner.groups.all()
    }

    /// Create and persist a new root group.
    pub async fn create_group(
        &self,
        name: &str,
    ) -> Result<Shared<PermissionGroup>, PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        let name = name.trim();
        self.check_group_name(name, None).await?;

        let group = self.inner.groups.insert(PermissionGroup::new(
            self.inner.groups.collection().clone(),
            name,
        ));
        group.read().save();
        debug!(name, "created group");

        Ok(group)
    }

    /// Delete a group.
    ///
    /// Child groups are moved up to the deleted group's parent. Members are moved to the parent as
    /// well or, if there is none, to the default group.
    pub async fn delete_group(
        &self,
        group: &Shared<PermissionGroup>,
    ) -> Result<(), PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_group_registered(group)?;
        if Arc::ptr_eq(group, &self.inner.default_group) {
            return Err(IllegalStateError::DefaultGroupProtected.into());
        }

        let (id, parent, members) = {
            let group = group.read();
            (group.id(), group.parent(), group.members().clone())
        };

        for child in self.inner.groups.all() {
            if child.read().parent() != Some(id) {
                continue;
            }
            child.write().set_parent(parent);
            child.read().save();
        }

        let new_home = parent
            .and_then(|parent| self.inner.groups.lookup(ID_FIELD, &parent.to_string()))
            .unwrap_or_else(|| self.inner.default_group.clone());
        let new_home_id = new_home.read().id();

        for member in members {
            let Some(user) = self.inner.users.lookup(ID_FIELD, &member.to_string()) else {
                continue;
            };
            user.write().set_group(Some(new_home_id));
            new_home.write().insert_member(member);
            user.read().save();
        }

        self.inner.groups.delete(group);
        debug!(group = %id, "deleted group");

        Ok(())
    }

    /// Rename a group, names stay unique ignoring case.
    pub async fn rename_group(
        &self,
        group: &Shared<PermissionGroup>,
        name: &str,
    ) -> Result<(), PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_group_registered(group)?;
        let name = name.trim();
        self.check_group_name(name, Some(group)).await?;

        let old_key = group.read().name_key();
        group.write().set_name(name);
        self.inner.groups.rekey(group, NAME_KEY_FIELD, &old_key);
        group.read().save();

        Ok(())
    }

    /// Set or clear the parent of a group.
    ///
    /// Fails if the new parent is the group itself or one of its descendants, nothing is changed
    /// in that case. The default group can not get a parent.
    pub async fn set_parent(
        &self,
        group: &Shared<PermissionGroup>,
        parent: Option<&Shared<PermissionGroup>>,
        persist: bool,
    ) -> Result<(), PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_group_registered(group)?;
        let group_id = group.read().id();

        let parent_id = match parent {
            Some(parent) => {
                self.check_group_registered(parent)?;
                if Arc::ptr_eq(group, &self.inner.default_group) {
                    return Err(IllegalStateError::DefaultGroupProtected.into());
                }

                let parent_id = parent.read().id();
                if self.ancestors_contain(Some(parent_id), group_id) {
                    return Err(PermissionError::Cycle {
                        group: group_id,
                        parent: parent_id,
                    });
                }
                Some(parent_id)
            }
            None => None,
        };

        let mut group = group.write();
        group.set_parent(parent_id);
        if persist {
            group.save();
        } else {
            group.entity().mark_dirty();
        }

        Ok(())
    }

    /// `true` if `needle` is `start` or one of its ancestors.
    fn ancestors_contain(&self, start: Option<Identifier>, needle: Identifier) -> bool {
        let mut visited = HashSet::new();
        let mut current = start;

        while let Some(id) = current {
            if id == needle {
                return true;
            }
            if !visited.insert(id) {
                return false;
            }
            current = self
                .inner
                .groups
                .lookup(ID_FIELD, &id.to_string())
                .and_then(|group| group.read().parent());
        }

        false
    }

    async fn check_group_name(
        &self,
        name: &str,
        renamed: Option<&Shared<PermissionGroup>>,
    ) -> Result<(), PermissionError> {
        if name.is_empty() {
            return Err(ValidationError::EmptyName.into());
        }

        if let Some(existing) = self.inner.groups.get(NAME_KEY_FIELD, &name_key(name)).await? {
            let same = renamed.is_some_and(|renamed| Arc::ptr_eq(renamed, &existing));
            if !same {
                return Err(ValidationError::DuplicateName(name.to_string()).into());
            }
        }

        Ok(())
    }

    fn check_group_registered(
        &self,
        group: &Shared<PermissionGroup>,
    ) -> Result<(), PermissionError> {
        if self.inner.groups.is_registered(group) {
            Ok(())
        } else {
            let id = group.read().id();
            Err(IllegalStateError::NotRegistered("group", id).into())
        }
    }

    // Users
    // ~~~~~

    /// Permission user of a principal, `None` if none was created.
    pub async fn get_user(
        &self,
        principal: &PrincipalId,
    ) -> Result<Option<Shared<PermissionUser>>, PermissionError> {
        let user = self.inner.users.get(PRINCIPAL_FIELD, principal.as_str()).await?;
        if let Some(user) = &user {
            self.link_member(user).await;
        }
        Ok(user)
    }

    pub async fn get_user_by_id(
        &self,
        id: Identifier,
    ) -> Result<Option<Shared<PermissionUser>>, PermissionError> {
        let user = self.inner.users.get(ID_FIELD, &id.to_string()).await?;
        if let Some(user) = &user {
            self.link_member(user).await;
        }
        Ok(user)
    }

    /// All registered users.
    pub fn users(&self) -> Vec<Shared<PermissionUser>> {
        self.inner.users.all()
    }

    /// Users loaded from the store after start are not members of their group yet.
    async fn link_member(&self, user: &Shared<PermissionUser>) {
        let (id, group_id) = {
            let user = user.read();
            (user.id(), user.group())
        };
        let Some(group_id) = group_id else {
            return;
        };
        let Some(group) = self.inner.groups.lookup(ID_FIELD, &group_id.to_string()) else {
            return;
        };
        if group.read().has_member(id) {
            return;
        }

        let _guard = self.inner.mutation.lock().await;

        // Check again, the user might have been moved or deleted in the meantime.
        if !self.inner.users.is_registered(user) || user.read().group() != Some(group_id) {
            return;
        }
        if self.inner.groups.is_registered(&group) {
            group.write().insert_member(id);
        }
    }

    /// Create and persist a permission user for a principal.
    ///
    /// Fails if a user for the principal exists in memory or in the store.
    pub async fn create_user(
        &self,
        principal: PrincipalId,
    ) -> Result<Shared<PermissionUser>, PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        if self
            .inner
            .users
            .get(PRINCIPAL_FIELD, principal.as_str())
            .await?
            .is_some()
        {
            return Err(IllegalArgumentError::UserExists(principal).into());
        }

        let user = self.inner.users.insert(PermissionUser::new(
            self.inner.users.collection().clone(),
            principal,
        ));
        user.read().save();
        debug!(principal = %user.read().principal(), "created user");

        Ok(user)
    }

    /// Delete a user and remove it from its group.
    pub async fn delete_user(&self, user: &Shared<PermissionUser>) -> Result<(), PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_user_registered(user)?;
        let (id, group_id) = {
            let user = user.read();
            (user.id(), user.group())
        };

        if let Some(group) =
            group_id.and_then(|id| self.inner.groups.lookup(ID_FIELD, &id.to_string()))
        {
            group.write().remove_member(id);
        }

        self.inner.users.delete(user);
        debug!(user = %id, "deleted user");

        Ok(())
    }

    /// Make the user a member of the group, moving it out of its previous group.
    ///
    /// Returns `false` if the user already was a member.
    pub async fn add_member(
        &self,
        group: &Shared<PermissionGroup>,
        user: &Shared<PermissionUser>,
    ) -> Result<bool, PermissionError> {
        self.set_user_group(user, Some(group)).await
    }

    /// Remove the user from the group, leaving it without group.
    ///
    /// Returns `false` if the user was not a member.
    pub async fn remove_member(
        &self,
        group: &Shared<PermissionGroup>,
        user: &Shared<PermissionUser>,
    ) -> Result<bool, PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_group_registered(group)?;
        self.check_user_registered(user)?;

        let group_id = group.read().id();
        if user.read().group() != Some(group_id) {
            return Ok(false);
        }

        self.assign(user, None);
        Ok(true)
    }

    /// Move the user into the group or, with `None`, out of any group.
    ///
    /// Returns `false` if the assignment did not change.
    pub async fn set_user_group(
        &self,
        user: &Shared<PermissionUser>,
        group: Option<&Shared<PermissionGroup>>,
    ) -> Result<bool, PermissionError> {
        let _guard = self.inner.mutation.lock().await;

        self.check_user_registered(user)?;
        if let Some(group) = group {
            self.check_group_registered(group)?;
        }

        Ok(self.assign(user, group))
    }

    /// Update both sides of the membership and persist the user.
    fn assign(
        &self,
        user: &Shared<PermissionUser>,
        group: Option<&Shared<PermissionGroup>>,
    ) -> bool {
        let (id, current) = {
            let user = user.read();
            (user.id(), user.group())
        };
        let target = group.map(|group| group.read().id());

        if current == target {
            if let Some(group) = group {
                group.write().insert_member(id);
            }
            return false;
        }

        if let Some(previous) =
            current.and_then(|id| self.inner.groups.lookup(ID_FIELD, &id.to_string()))
        {
            previous.write().remove_member(id);
        }

        user.write().set_group(target);
        if let Some(group) = group {
            group.write().insert_member(id);
        }
        user.read().save();

        true
    }

    fn check_user_registered(&self, user: &Shared<PermissionUser>) -> Result<(), PermissionError> {
        if self.inner.users.is_registered(user) {
            Ok(())
        } else {
            let id = user.read().id();
            Err(IllegalStateError::NotRegistered("user", id).into())
        }
    }

    // Nodes
    // ~~~~~

    /// Set or unset a node flag on a group or user.
    ///
    /// Without `persist` the entity is only marked dirty. Returns the previous flag.
    pub fn set_permission(
        &self,
        target: Target<'_>,
        node: &str,
        change: impl Into<FlagChange>,
        persist: bool,
    ) -> Result<Option<bool>, PermissionError> {
        let path = normalize_path(node)?;
        let change = change.into();

        match target {
            Target::Group(group) => {
                self.check_group_registered(group)?;
                update(group, "group", &path, change, persist)
            }
            Target::User(user) => {
                self.check_user_registered(user)?;
                update(user, "user", &path, change, persist)
            }
        }
    }
}

/// Change a node of the entity and save or mark it, unless it was deleted in the meantime.
fn update<E: Persist>(
    entity: &Shared<E>,
    kind: &'static str,
    path: &str,
    change: FlagChange,
    persist: bool,
) -> Result<Option<bool>, PermissionError> {
    let mut entity = entity.write();
    if entity.entity().is_deleted() {
        let id = entity.entity().id();
        return Err(IllegalStateError::NotRegistered(kind, id).into());
    }

    let previous = apply(entity.entity_mut().nodes_mut(), path, change)?;
    if persist {
        entity.save();
    } else {
        entity.entity().mark_dirty();
    }

    Ok(previous)
}

fn apply(
    nodes: &mut NodeSet,
    path: &str,
    change: FlagChange,
) -> Result<Option<bool>, PermissionError> {
    match change {
        FlagChange::Set(value) => Ok(nodes.set(path, value)?),
        FlagChange::Unset => Ok(nodes.unset(path)),
    }
}
