// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Size of identifiers in bytes.
pub const IDENTIFIER_LEN: usize = 16;

/// Opaque, globally unique 128-bit identifier of a persisted entity.
///
/// Identifiers are random (UUID v4) and serialized in their canonical hyphenated string form, which
/// is also the form used as storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Uuid);

impl Identifier {
    /// Generate a new random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an identifier from its raw bytes representation.
    pub const fn from_bytes(bytes: [u8; IDENTIFIER_LEN]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Bytes of the identifier.
    pub fn as_bytes(&self) -> &[u8; IDENTIFIER_LEN] {
        self.0.as_bytes()
    }
}

impl From<Uuid> for Identifier {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<Identifier> for Uuid {
    fn from(value: Identifier) -> Self {
        value.0
    }
}

impl FromStr for Identifier {
    type Err = IdentifierError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(value.trim())?))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Debug for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identifier").field(&self.to_string()).finish()
    }
}

/// Error types for `Identifier` struct.
#[derive(Error, Debug)]
pub enum IdentifierError {
    /// Identifier string is not a valid UUID.
    #[error("invalid identifier encoding: {0}")]
    InvalidEncoding(#[from] uuid::Error),
}
