// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Marker which turns a node into a wildcard query when it terminates it, e.g. `server.*`.
const WILDCARD: &str = "*";

/// Separator between path segments.
const SEGMENT_SEPARATOR: char = '.';

/// Separator between path and flag in the text form of a node, e.g. `server.kick:1`.
const FLAG_SEPARATOR: char = ':';

/// Normalize a node path for storage or lookup.
///
/// Paths are trimmed and lower-cased. Stored paths never contain a wildcard and never contain the
/// flag separator.
pub fn normalize_path(path: &str) -> Result<String, NodeError> {
    let path = path.trim().to_lowercase();

    if path.is_empty() {
        return Err(NodeError::EmptyPath);
    }

    if path.contains(WILDCARD) {
        return Err(NodeError::WildcardInPath(path));
    }

    if path.contains(FLAG_SEPARATOR) {
        return Err(NodeError::FlagSeparatorInPath(path));
    }

    Ok(path)
}

/// Permission query against a set of nodes.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Query {
    /// Look up the flag of exactly this path.
    Exact(String),

    /// Granted if any node equal to or below this prefix is set to `true`.
    ///
    /// An empty prefix covers every node.
    Wildcard(String),
}

impl Query {
    /// Parse a requested node, a trailing `.*` (or a lone `*`) makes it a wildcard query.
    pub fn parse(node: &str) -> Self {
        let node = node.trim().to_lowercase();

        if node == WILDCARD {
            return Self::Wildcard(String::new());
        }

        match node.strip_suffix(".*") {
            Some(prefix) => Self::Wildcard(prefix.trim_end_matches(SEGMENT_SEPARATOR).to_string()),
            None => Self::Exact(node),
        }
    }

    /// Wildcard query for all nodes below `prefix`.
    ///
    /// The prefix may or may not already carry the trailing `.*` or a trailing `.`.
    pub fn wildcard(prefix: &str) -> Self {
        match Self::parse(prefix) {
            Self::Exact(prefix) => {
                Self::Wildcard(prefix.trim_end_matches(SEGMENT_SEPARATOR).to_string())
            }
            wildcard => wildcard,
        }
    }

    /// Path (for exact queries) or prefix (for wildcard queries) without the wildcard marker.
    pub fn path(&self) -> &str {
        match self {
            Self::Exact(path) | Self::Wildcard(path) => path,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard(_))
    }

    /// Returns `true` if a stored path is covered by this query.
    pub fn matches(&self, stored: &str) -> bool {
        match self {
            Self::Exact(path) => stored == path,
            Self::Wildcard(prefix) => is_below(stored, prefix),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(path) => f.write_str(path),
            Self::Wildcard(prefix) if prefix.is_empty() => f.write_str(WILDCARD),
            Self::Wildcard(prefix) => write!(f, "{prefix}.{WILDCARD}"),
        }
    }
}

/// `stored` is equal to `prefix` or one of its sub-nodes.
pub(crate) fn is_below(stored: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }

    match stored.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with(SEGMENT_SEPARATOR),
        None => false,
    }
}

/// Requested change of a node flag, as parsed from command input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlagChange {
    Set(bool),
    Unset,
}

impl FromStr for FlagChange {
    type Err = NodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_lowercase();
        match value.as_str() {
            "" => Err(NodeError::EmptyFlag),
            "none" | "null" | "nil" => Ok(Self::Unset),
            "1" | "true" | "on" | "yes" => Ok(Self::Set(true)),
            _ => Ok(Self::Set(false)),
        }
    }
}

impl From<bool> for FlagChange {
    fn from(value: bool) -> Self {
        Self::Set(value)
    }
}

impl From<Option<bool>> for FlagChange {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(flag) => Self::Set(flag),
            None => Self::Unset,
        }
    }
}

/// Single node path with its flag.
///
/// The text form is `path:flag` where `flag` is `1` or `true` for granted nodes; any other flag
/// text denies. A node without flag is granted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    pub path: String,
    pub flag: bool,
}

impl Node {
    pub fn new(path: &str, flag: bool) -> Result<Self, NodeError> {
        Ok(Self {
            path: normalize_path(path)?,
            flag,
        })
    }
}

impl FromStr for Node {
    type Err = NodeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once(FLAG_SEPARATOR) {
            Some((path, flag)) => {
                let flag = flag.trim();
                Self::new(path, flag == "1" || flag.eq_ignore_ascii_case("true"))
            }
            None => Self::new(value, true),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{FLAG_SEPARATOR}{}",
            self.path,
            if self.flag { "1" } else { "0" }
        )
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NodeError {
    #[error("node path must not be empty")]
    EmptyPath,

    #[error("node path '{0}' contains a wildcard, wildcards are only allowed in queries")]
    WildcardInPath(String),

    #[error("node path '{0}' contains the flag separator ':'")]
    FlagSeparatorInPath(String),

    #[error("node flag must not be empty")]
    EmptyFlag,
}
