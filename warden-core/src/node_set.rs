// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeError, Query, is_below, normalize_path};

/// Case-insensitive set of node paths, each carrying a boolean flag.
///
/// Paths are normalized to lower case before every insertion and lookup. Wildcards never get
/// stored, they only exist in queries (see [`Query`]).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, bool>", into = "BTreeMap<String, bool>")]
pub struct NodeSet {
    nodes: BTreeMap<String, bool>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag of a node.
    ///
    /// Returns the previously stored flag, if any.
    pub fn set(&mut self, path: &str, value: bool) -> Result<Option<bool>, NodeError> {
        let path = normalize_path(path)?;
        Ok(self.nodes.insert(path, value))
    }

    /// Remove a node.
    ///
    /// Returns the removed flag or `None` if the node was not set.
    pub fn unset(&mut self, path: &str) -> Option<bool> {
        self.nodes.remove(&path.trim().to_lowercase())
    }

    /// Stored flag for exactly this path.
    pub fn exact(&self, path: &str) -> Option<bool> {
        self.nodes.get(&path.trim().to_lowercase()).copied()
    }

    /// Returns `true` if any node equal to or below `prefix` is set to `true`.
    ///
    /// Storing only `a.b.c = false` makes `any("a.b")` return `false`.
    pub fn any(&self, prefix: &str) -> bool {
        self.below(prefix).any(|(_, value)| value)
    }

    /// Answer a query, returns `None` if no stored node applies to it.
    ///
    /// For wildcard queries a node applies when it is equal to or below the prefix; the answer is
    /// `true` as soon as one of them is granted.
    pub fn lookup(&self, query: &Query) -> Option<bool> {
        match query {
            Query::Exact(path) => self.exact(path),
            Query::Wildcard(prefix) => {
                let mut applicable = false;
                for (_, value) in self.below(prefix) {
                    if value {
                        return Some(true);
                    }
                    applicable = true;
                }
                applicable.then_some(false)
            }
        }
    }

    /// All nodes equal to or below `prefix`, in path order.
    pub fn below(&self, prefix: &str) -> impl Iterator<Item = (&str, bool)> {
        let prefix = prefix.trim().to_lowercase();
        let start = prefix.clone();

        // Every path starting with the prefix sorts right after it, stop as soon as they end.
        self.nodes
            .range::<str, _>((Bound::Included(start.as_str()), Bound::Unbounded))
            .take_while(move |(path, _)| path.starts_with(start.as_str()))
            .filter(move |(path, _)| is_below(path, &prefix))
            .map(|(path, value)| (path.as_str(), *value))
    }

    /// All stored nodes, used when building snapshots.
    pub fn all(&self) -> impl Iterator<Item = (&str, bool)> {
        self.nodes.iter().map(|(path, value)| (path.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl TryFrom<BTreeMap<String, bool>> for NodeSet {
    type Error = NodeError;

    fn try_from(value: BTreeMap<String, bool>) -> Result<Self, Self::Error> {
        let mut nodes = NodeSet::new();
        for (path, flag) in value {
            nodes.set(&path, flag)?;
        }
        Ok(nodes)
    }
}

impl From<NodeSet> for BTreeMap<String, bool> {
    fn from(value: NodeSet) -> Self {
        value.nodes
    }
}

impl FromIterator<Node> for NodeSet {
    fn from_iter<T: IntoIterator<Item = Node>>(iter: T) -> Self {
        Self {
            nodes: iter.into_iter().map(|node| (node.path, node.flag)).collect(),
        }
    }
}
