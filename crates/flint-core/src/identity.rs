//! Identity atoms
//!
//! ArenaId: arena identifier, also the suffix of the arena's log table
//! EntityId: stable identifier of a live-world entity
//! RecordId: store-assigned id of one logged mutation

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{CoreError, InvalidId};

const ARENA_ID_MAX_LEN: usize = 64;

/// Arena identifier.
///
/// 1-64 characters from `[A-Za-z0-9_-]`, folded to lowercase: arena lookup
/// is case-insensitive, and so are the SQLite table names derived from it.
/// Nothing outside that alphabet may ever pass validation.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ArenaId(String);

impl ArenaId {
    pub fn new(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        let invalid = |raw: &str, reason: &str| -> CoreError {
            InvalidId::Arena {
                raw: raw.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };
        if s.is_empty() {
            return Err(invalid(&s, "empty"));
        }
        if s.len() > ARENA_ID_MAX_LEN {
            return Err(invalid(&s, "longer than 64 characters"));
        }
        if !s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(invalid(&s, "only ASCII letters, digits, `_` and `-` are allowed"));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaId({:?})", self.0)
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArenaId {
    type Err = CoreError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ArenaId::new(s)
    }
}

impl TryFrom<String> for ArenaId {
    type Error = CoreError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        ArenaId::new(s)
    }
}

impl From<ArenaId> for String {
    fn from(id: ArenaId) -> String {
        id.0
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    pub fn new(id: Uuid) -> Self {
        Self(id)
    }

    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(InvalidId::Entity {
                raw: s.to_string(),
                reason: "empty".into(),
            }
            .into());
        }
        Uuid::parse_str(trimmed).map(Self).map_err(|err| {
            InvalidId::Entity {
                raw: s.to_string(),
                reason: err.to_string(),
            }
            .into()
        })
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<EntityId> for Uuid {
    fn from(id: EntityId) -> Uuid {
        id.0
    }
}

/// Store-assigned record id. Positive and strictly increasing within one
/// arena log; never reused until the log is dropped.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Parses the string form used as a key in the state side store.
    pub fn parse_str(s: &str) -> Result<Self, CoreError> {
        s.parse::<u64>().map(Self).map_err(|err| {
            InvalidId::Record {
                raw: s.to_string(),
                reason: err.to_string(),
            }
            .into()
        })
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RecordId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for u64 {
    fn from(id: RecordId) -> u64 {
        id.0
    }
}
