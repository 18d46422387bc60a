// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core data-types of the warden authorization layer.
//!
//! Every persisted entity is addressed by an [`Identifier`], an opaque 128-bit value which is
//! generated once when the entity is created and never changes afterwards. The external identity
//! a permission user stands for (a player, an account) is a [`PrincipalId`].
//!
//! Capabilities are expressed as dot-separated, case-insensitive node paths like `server.kick`.
//! A [`NodeSet`] maps such paths to a boolean flag and answers two kinds of [`Query`]: exact
//! lookups (`server.kick`) and wildcard lookups (`server.*`), where the latter is granted as soon
//! as any stored node below the prefix is set to `true`.
//!
//! ```
//! use warden_core::{NodeSet, Query};
//!
//! let mut nodes = NodeSet::new();
//! nodes.set("Server.Kick", true).unwrap();
//! nodes.set("server.ban", false).unwrap();
//!
//! assert_eq!(nodes.exact("server.kick"), Some(true));
//! assert_eq!(nodes.lookup(&Query::parse("server.*")), Some(true));
//! assert_eq!(nodes.lookup(&Query::parse("chat.*")), None);
//! ```
mod identifier;
mod node;
mod node_set;
mod principal;

pub use identifier::{Identifier, IdentifierError};
pub use node::{FlagChange, Node, NodeError, Query, normalize_path};
pub use node_set::NodeSet;
pub use principal::{PrincipalError, PrincipalId};
