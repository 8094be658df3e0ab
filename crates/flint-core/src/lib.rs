//! Core domain types for the Flint rollback log.
//!
//! Module hierarchy follows type dependency order:
//! - effect: error classification (retry/side-effect semantics)
//! - identity: ArenaId, EntityId, RecordId
//! - location: Location3D, BlockPos, Boundary
//! - state: StateBlob
//! - mutation: MutationKind, MutationDescription, Mutation, SubjectKey
//! - record: RecordHeader, RecordSubject, RollbackRecord, RecordRow

#![forbid(unsafe_code)]

pub mod effect;
pub mod error;
pub mod identity;
pub mod location;
pub mod mutation;
pub mod record;
pub mod state;

pub use effect::{Effect, Transience};
pub use error::{CoreError, InvalidId, InvalidMutation, InvalidStateBlob, RecordDecodeError};
pub use identity::{ArenaId, EntityId, RecordId};
pub use location::{BlockPos, Boundary, Location3D};
pub use mutation::{ArenaContext, Mutation, MutationDescription, MutationKind, SubjectKey};
pub use record::{
    BlockSubject, EntityChangeSubject, EntityCreationSubject, NewRecord, RecordHeader, RecordRow,
    RecordSubject, RollbackRecord,
};
pub use state::StateBlob;
