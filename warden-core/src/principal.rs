// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Identifier;

/// Stable identity of the external principal (player, account) a permission user represents.
///
/// Principals are opaque, case-sensitive and never empty, for example `steam:123` or the
/// identifier of a player record.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PrincipalId(String);

impl PrincipalId {
    pub fn new(value: impl Into<String>) -> Result<Self, PrincipalError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(PrincipalError::Empty);
        }
        if trimmed.len() == value.len() {
            Ok(Self(value))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Identifier> for PrincipalId {
    fn from(value: Identifier) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<String> for PrincipalId {
    type Error = PrincipalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for PrincipalId {
    type Error = PrincipalError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PrincipalId> for String {
    fn from(value: PrincipalId) -> Self {
        value.0
    }
}

impl FromStr for PrincipalId {
    type Err = PrincipalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::new(value)
    }
}

impl AsRef<str> for PrincipalId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PrincipalId").field(&self.0).finish()
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PrincipalError {
    #[error("principal identifier must not be empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::{PrincipalError, PrincipalId};
    use crate::Identifier;

    #[test]
    fn trims_and_rejects_empty() {
        assert_eq!(PrincipalId::new(" steam:123 ").unwrap().as_str(), "steam:123");
        assert_eq!(PrincipalId::new("  "), Err(PrincipalError::Empty));
        assert!(serde_json::from_str::<PrincipalId>("\"\"").is_err());
    }

    #[test]
    fn from_identifier() {
        let id = Identifier::from_bytes([1; 16]);
        assert_eq!(PrincipalId::from(id).as_str(), id.to_string());
    }
}
