// SPDX-License-Identifier: MIT OR Apache-2.0

//! Player records and the principal directory built from them.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;
use warden_core::{Identifier, NodeSet, PrincipalId};
use warden_store::{
    CacheError, Collection, DocumentStore, Entity, EntityCache, ID_FIELD, Persist, Shared,
};

use crate::error::PlayerError;

/// Index field holding the player name.
pub const USERNAME_FIELD: &str = "username";

/// Index field holding the platform account id of a player.
pub const STEAM_ID_FIELD: &str = "steam_id";

/// Resolves secondary identifiers (platform account ids) to known principals.
pub trait PrincipalDirectory {
    /// Identifier of the principal known under the secondary id, `None` if there is none.
    fn resolve_secondary(
        &self,
        secondary: &str,
    ) -> impl Future<Output = Result<Option<Identifier>, CacheError>> + Send;
}

/// Known player, reachable by identifier, username and (if linked) platform account id.
#[derive(Debug)]
pub struct PlayerRecord {
    entity: Entity,
    username: String,
    steam_id: Option<String>,
}

impl PlayerRecord {
    pub fn id(&self) -> Identifier {
        self.entity.id()
    }

    /// Principal permission checks for this player are made for.
    pub fn principal(&self) -> PrincipalId {
        PrincipalId::from(self.id())
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn steam_id(&self) -> Option<&str> {
        self.steam_id.as_deref()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: Identifier,
    pub username: String,
    pub steam_id: Option<String>,
    #[serde(default)]
    pub nodes: NodeSet,
}

impl Persist for PlayerRecord {
    type Snapshot = PlayerSnapshot;

    const INDICES: &'static [&'static str] = &[ID_FIELD, USERNAME_FIELD, STEAM_ID_FIELD];

    fn entity(&self) -> &Entity {
        &self.entity
    }

    fn entity_mut(&mut self) -> &mut Entity {
        &mut self.entity
    }

    fn index_key(&self, field: &str) -> Option<String> {
        match field {
            ID_FIELD => Some(self.id().to_string()),
            USERNAME_FIELD => Some(self.username.clone()),
            STEAM_ID_FIELD => self.steam_id.clone(),
            _ => None,
        }
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id(),
            username: self.username.clone(),
            steam_id: self.steam_id.clone(),
            nodes: self.entity.nodes().clone(),
        }
    }

    fn hydrate(collection: Collection, snapshot: PlayerSnapshot) -> Self {
        Self {
            entity: Entity::hydrate(snapshot.id, collection, snapshot.nodes),
            username: snapshot.username,
            steam_id: snapshot.steam_id,
        }
    }
}

/// Cache of player records with get-or-load-or-create semantics.
///
/// Creating players and linking platform accounts is serialized, a platform account is linked to
/// at most one player.
pub struct PlayerDirectory<S> {
    players: EntityCache<S, PlayerRecord>,
    mutation: Mutex<()>,
}

impl<S: DocumentStore> PlayerDirectory<S> {
    pub fn new(store: S, collection: Collection) -> Self {
        Self {
            players: EntityCache::new(store, collection),
            mutation: Mutex::new(()),
        }
    }

    /// Player with the given username, created and persisted if it is neither cached nor
    /// stored.
    pub async fn get_or_create(&self, username: &str) -> Result<Shared<PlayerRecord>, CacheError> {
        if let Some(player) = self.players.get(USERNAME_FIELD, username).await? {
            return Ok(player);
        }

        let _guard = self.mutation.lock().await;

        // Another caller might have created it while we were waiting.
        if let Some(player) = self.players.lookup(USERNAME_FIELD, username) {
            return Ok(player);
        }

        let player = self.players.insert(PlayerRecord {
            entity: Entity::new(self.players.collection().clone()),
            username: username.to_string(),
            steam_id: None,
        });
        player.read().save();
        debug!(username, "created player record");

        Ok(player)
    }

    pub async fn by_username(
        &self,
        username: &str,
    ) -> Result<Option<Shared<PlayerRecord>>, CacheError> {
        self.players.get(USERNAME_FIELD, username).await
    }

    pub async fn by_id(&self, id: Identifier) -> Result<Option<Shared<PlayerRecord>>, CacheError> {
        self.players.get(ID_FIELD, &id.to_string()).await
    }

    pub async fn by_steam_id(
        &self,
        steam_id: &str,
    ) -> Result<Option<Shared<PlayerRecord>>, CacheError> {
        self.players.get(STEAM_ID_FIELD, steam_id).await
    }

    /// Link or unlink the platform account of a player and persist the change.
    ///
    /// Fails without changes if another player is linked to the account already.
    pub async fn set_steam_id(
        &self,
        player: &Shared<PlayerRecord>,
        steam_id: Option<&str>,
    ) -> Result<(), PlayerError> {
        let _guard = self.mutation.lock().await;

        if let Some(steam_id) = steam_id {
            let holder = self.by_steam_id(steam_id).await?;
            if let Some(holder) = holder.filter(|holder| !Arc::ptr_eq(holder, player)) {
                return Err(PlayerError::SteamIdTaken {
                    steam_id: steam_id.to_string(),
                    holder: holder.read().id(),
                });
            }
        }

        let previous = player.write().steam_id.take();
        if let Some(previous) = previous {
            self.players.rekey(player, STEAM_ID_FIELD, &previous);
        }

        player.write().steam_id = steam_id.map(str::to_string);
        self.players.register(player);
        player.read().save();

        Ok(())
    }
}

impl<S: DocumentStore> PrincipalDirectory for PlayerDirectory<S> {
    async fn resolve_secondary(&self, secondary: &str) -> Result<Option<Identifier>, CacheError> {
        Ok(self
            .by_steam_id(secondary)
            .await?
            .map(|player| player.read().id()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use warden_core::PrincipalId;
    use warden_store::{Collection, MemoryStore, WriteQueue};

    use crate::error::PlayerError;

    use super::{PlayerDirectory, PrincipalDirectory};

    #[tokio::test]
    async fn three_indices_one_instance() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 1);
        let directory =
            PlayerDirectory::new(store.clone(), Collection::new("players", queue.clone()));

        let player = directory.get_or_create("panda").await.unwrap();
        let again = directory.get_or_create("panda").await.unwrap();
        assert!(Arc::ptr_eq(&player, &again));
        assert!(directory.by_steam_id("765").await.unwrap().is_none());

        directory.set_steam_id(&player, Some("765")).await.unwrap();
        let id = player.read().id();
        assert_eq!(directory.resolve_secondary("765").await.unwrap(), Some(id));
        assert_eq!(
            player.read().principal(),
            PrincipalId::new(id.to_string()).unwrap()
        );
        queue.flush().await;

        // Cold directory over the same store.
        let cold = PlayerDirectory::new(store, Collection::new("players", queue));
        let by_steam = cold.by_steam_id("765").await.unwrap().unwrap();
        let by_name = cold.by_username("panda").await.unwrap().unwrap();
        let by_id = cold.by_id(id).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&by_steam, &by_name));
        assert!(Arc::ptr_eq(&by_steam, &by_id));

        // Unlinking drops the secondary index entry.
        cold.set_steam_id(&by_steam, None).await.unwrap();
        assert!(cold.resolve_secondary("765").await.unwrap().is_none());
        assert_eq!(by_steam.read().steam_id(), None);
    }

    #[tokio::test]
    async fn platform_accounts_link_to_one_player() {
        let store = MemoryStore::new();
        let queue = WriteQueue::spawn(store.clone(), 1);
        let directory =
            PlayerDirectory::new(store.clone(), Collection::new("players", queue.clone()));

        let alice = directory.get_or_create("alice").await.unwrap();
        let bob = directory.get_or_create("bob").await.unwrap();
        let alice_id = alice.read().id();

        directory.set_steam_id(&alice, Some("765")).await.unwrap();
        assert_matches!(
            directory.set_steam_id(&bob, Some("765")).await,
            Err(PlayerError::SteamIdTaken { steam_id, holder })
                if steam_id == "765" && holder == alice_id
        );
        assert_eq!(bob.read().steam_id(), None);
        assert_eq!(directory.resolve_secondary("765").await.unwrap(), Some(alice_id));

        // Linking the same account again is fine.
        directory.set_steam_id(&alice, Some("765")).await.unwrap();
        queue.flush().await;

        // Accounts only known to the store are taken as well.
        let cold = PlayerDirectory::new(store, Collection::new("players", queue));
        let carol = cold.get_or_create("carol").await.unwrap();
        assert_matches!(
            cold.set_steam_id(&carol, Some("765")).await,
            Err(PlayerError::SteamIdTaken { .. })
        );

        // Once unlinked the account is free again.
        directory.set_steam_id(&alice, None).await.unwrap();
        directory.set_steam_id(&bob, Some("765")).await.unwrap();
        assert_eq!(
            directory.resolve_secondary("765").await.unwrap(),
            Some(bob.read().id())
        );
    }
}
