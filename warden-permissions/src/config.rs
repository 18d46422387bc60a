// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration of the permission service.
use serde::{Deserialize, Serialize};
use warden_store::DEFAULT_WORKERS;

/// Name of the default group if none is configured.
pub const DEFAULT_GROUP_NAME: &str = "default";

/// Default collection holding permission groups.
pub const DEFAULT_GROUPS_COLLECTION: &str = "warden_permission_groups";

/// Default collection holding permission users.
pub const DEFAULT_USERS_COLLECTION: &str = "warden_permission_users";

/// Default collection holding player records.
pub const DEFAULT_PLAYERS_COLLECTION: &str = "warden_players";

/// Configuration parameters of the permission service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the always present root group every user falls back to.
    pub default_group: String,

    /// Collection permission groups are stored in.
    pub groups_collection: String,

    /// Collection permission users are stored in.
    pub users_collection: String,

    /// Collection player records are stored in.
    pub players_collection: String,

    /// Number of background workers writing to the store.
    pub write_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_group: DEFAULT_GROUP_NAME.to_string(),
            groups_collection: DEFAULT_GROUPS_COLLECTION.to_string(),
            users_collection: DEFAULT_USERS_COLLECTION.to_string(),
            players_collection: DEFAULT_PLAYERS_COLLECTION.to_string(),
            write_workers: DEFAULT_WORKERS,
        }
    }
}

impl Config {
    pub fn with_default_group(mut self, name: &str) -> Self {
        self.default_group = name.to_string();
        self
    }

    pub fn with_groups_collection(mut self, collection: &str) -> Self {
        self.groups_collection = collection.to_string();
        self
    }

    pub fn with_users_collection(mut self, collection: &str) -> Self {
        self.users_collection = collection.to_string();
        self
    }

    pub fn with_players_collection(mut self, collection: &str) -> Self {
        self.players_collection = collection.to_string();
        self
    }

    pub fn with_write_workers(mut self, workers: usize) -> Self {
        self.write_workers = workers;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "default_group": "guests", "write_workers": 2 }"#).unwrap();
        assert_eq!(
            config,
            Config::default()
                .with_default_group("guests")
                .with_write_workers(2)
        );
        assert_eq!(config.groups_collection, "warden_permission_groups");
    }
}
