//! Core capability errors (identifier parsing, mutation validation, row decoding).
//!
//! These are bounded and stable: core errors represent refusal states of the
//! domain, never storage or platform failures.

use thiserror::Error;

use crate::effect::{Effect, Transience};
use crate::identity::RecordId;
use crate::mutation::MutationKind;

/// Invalid identifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("arena id `{raw}` is invalid: {reason}")]
    Arena { raw: String, reason: String },
    #[error("entity id `{raw}` is invalid: {reason}")]
    Entity { raw: String, reason: String },
    #[error("record id `{raw}` is invalid: {reason}")]
    Record { raw: String, reason: String },
}

/// A mutation description that does not carry exactly the fields its kind needs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvalidMutation {
    #[error("{kind} mutation requires `{field}`")]
    MissingField {
        kind: MutationKind,
        field: &'static str,
    },
    #[error("{kind} mutation does not accept `{field}`")]
    UnexpectedField {
        kind: MutationKind,
        field: &'static str,
    },
}

/// A state blob that is neither a string nor an object.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("state blob must be a string or an object, got {found}")]
pub struct InvalidStateBlob {
    pub found: &'static str,
}

/// A persisted row whose columns contradict each other.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("rollback record {id} is corrupt: {reason}")]
pub struct RecordDecodeError {
    pub id: RecordId,
    pub reason: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
    #[error(transparent)]
    InvalidMutation(#[from] InvalidMutation),
    #[error(transparent)]
    InvalidStateBlob(#[from] InvalidStateBlob),
    #[error(transparent)]
    RecordDecode(#[from] RecordDecodeError),
}

impl CoreError {
    pub fn transience(&self) -> Transience {
        // Core errors are pure domain/input failures.
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        Effect::None
    }
}
