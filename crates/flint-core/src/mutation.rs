//! Mutation descriptions and their validated, typed form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::InvalidMutation;
use crate::identity::{ArenaId, EntityId};
use crate::location::{BlockPos, Location3D};
use crate::record::{
    BlockSubject, EntityChangeSubject, EntityCreationSubject, NewRecord, RecordSubject,
};
use crate::state::StateBlob;

/// Closed set of loggable mutations. The ordinal is the persisted
/// `record_type` column and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    BlockChange,
    EntityCreation,
    EntityChange,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [
        MutationKind::BlockChange,
        MutationKind::EntityCreation,
        MutationKind::EntityChange,
    ];

    pub fn ordinal(self) -> i64 {
        match self {
            MutationKind::BlockChange => 0,
            MutationKind::EntityCreation => 1,
            MutationKind::EntityChange => 2,
        }
    }

    pub fn from_ordinal(ordinal: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.ordinal() == ordinal)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::BlockChange => "block_change",
            MutationKind::EntityCreation => "entity_creation",
            MutationKind::EntityChange => "entity_change",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The arena a mutation is logged against, with the world that fills in
/// locations that do not name one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArenaContext {
    pub arena: ArenaId,
    pub world: String,
}

impl ArenaContext {
    pub fn new(arena: ArenaId, world: impl Into<String>) -> Self {
        Self {
            arena,
            world: world.into(),
        }
    }
}

/// Loosely-typed mutation as reported by a platform hook.
///
/// Only `kind` is mandatory here; `Mutation::try_from` decides which of the
/// remaining fields the kind needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDescription {
    pub kind: MutationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location3D>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aux_data: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<StateBlob>,
}

impl MutationDescription {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            location: None,
            entity_id: None,
            type_tag: None,
            aux_data: None,
            state: None,
        }
    }

    pub fn block_change(location: Location3D, type_tag: impl Into<String>) -> Self {
        Self::new(MutationKind::BlockChange)
            .with_location(location)
            .with_type_tag(type_tag)
    }

    pub fn entity_creation(entity_id: EntityId) -> Self {
        Self::new(MutationKind::EntityCreation).with_entity_id(entity_id)
    }

    pub fn entity_change(
        location: Location3D,
        entity_id: EntityId,
        type_tag: impl Into<String>,
        state: StateBlob,
    ) -> Self {
        Self::new(MutationKind::EntityChange)
            .with_location(location)
            .with_entity_id(entity_id)
            .with_type_tag(type_tag)
            .with_state(state)
    }

    pub fn with_location(mut self, location: Location3D) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_entity_id(mut self, entity_id: EntityId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_type_tag(mut self, type_tag: impl Into<String>) -> Self {
        self.type_tag = Some(type_tag.into());
        self
    }

    pub fn with_aux_data(mut self, aux_data: i32) -> Self {
        self.aux_data = Some(aux_data);
        self
    }

    pub fn with_state(mut self, state: StateBlob) -> Self {
        self.state = Some(state);
        self
    }
}

/// A validated mutation. Each variant carries exactly the fields its
/// restoration needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    BlockChange {
        location: Location3D,
        type_tag: String,
        aux_data: i32,
        state: Option<StateBlob>,
    },
    EntityCreation {
        entity_id: EntityId,
        location: Option<Location3D>,
    },
    EntityChange {
        location: Location3D,
        entity_id: EntityId,
        type_tag: String,
        state: StateBlob,
    },
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Mutation::BlockChange { .. } => MutationKind::BlockChange,
            Mutation::EntityCreation { .. } => MutationKind::EntityCreation,
            Mutation::EntityChange { .. } => MutationKind::EntityChange,
        }
    }

    /// Identity used for deduplication within one round.
    pub fn subject_key(&self, default_world: &str) -> SubjectKey {
        match self {
            Mutation::BlockChange { location, .. } => SubjectKey::Block {
                world: location.world_or(default_world).to_string(),
                pos: location.block_pos(),
            },
            Mutation::EntityCreation { entity_id, .. }
            | Mutation::EntityChange { entity_id, .. } => SubjectKey::Entity(*entity_id),
        }
    }

    /// Splits the mutation into the record to append and the blob, if any,
    /// to store under the record's id once it is assigned.
    pub fn into_record(self, default_world: &str) -> (NewRecord, Option<StateBlob>) {
        match self {
            Mutation::BlockChange {
                location,
                type_tag,
                aux_data,
                state,
            } => {
                let world = location.world_or(default_world).to_string();
                let record = NewRecord {
                    world,
                    has_state: state.is_some(),
                    subject: RecordSubject::Block(BlockSubject {
                        pos: location.block_pos(),
                        type_tag,
                        aux_data,
                    }),
                };
                (record, state)
            }
            Mutation::EntityCreation {
                entity_id,
                location,
            } => {
                let world = location
                    .as_ref()
                    .map_or(default_world, |loc| loc.world_or(default_world))
                    .to_string();
                let record = NewRecord {
                    world,
                    has_state: false,
                    subject: RecordSubject::EntityCreation(EntityCreationSubject {
                        entity_id,
                        position: location.map(|loc| (loc.x, loc.y, loc.z)),
                    }),
                };
                (record, None)
            }
            Mutation::EntityChange {
                location,
                entity_id,
                type_tag,
                state,
            } => {
                let world = location.world_or(default_world).to_string();
                let record = NewRecord {
                    world,
                    has_state: true,
                    subject: RecordSubject::EntityChange(EntityChangeSubject {
                        entity_id,
                        position: (location.x, location.y, location.z),
                        type_tag,
                    }),
                };
                (record, Some(state))
            }
        }
    }
}

impl TryFrom<MutationDescription> for Mutation {
    type Error = InvalidMutation;

    fn try_from(desc: MutationDescription) -> Result<Self, Self::Error> {
        let kind = desc.kind;
        let missing = |field| InvalidMutation::MissingField { kind, field };
        let unexpected = |field| InvalidMutation::UnexpectedField { kind, field };

        match kind {
            MutationKind::BlockChange => {
                let location = desc.location.ok_or_else(|| missing("location"))?;
                let type_tag = desc.type_tag.ok_or_else(|| missing("type_tag"))?;
                if desc.entity_id.is_some() {
                    return Err(unexpected("entity_id"));
                }
                Ok(Mutation::BlockChange {
                    location,
                    type_tag,
                    aux_data: desc.aux_data.unwrap_or(0),
                    state: desc.state,
                })
            }
            MutationKind::EntityCreation => {
                let entity_id = desc.entity_id.ok_or_else(|| missing("entity_id"))?;
                if desc.type_tag.is_some() {
                    return Err(unexpected("type_tag"));
                }
                if desc.aux_data.is_some() {
                    return Err(unexpected("aux_data"));
                }
                if desc.state.is_some() {
                    return Err(unexpected("state"));
                }
                Ok(Mutation::EntityCreation {
                    entity_id,
                    location: desc.location,
                })
            }
            MutationKind::EntityChange => {
                let location = desc.location.ok_or_else(|| missing("location"))?;
                let entity_id = desc.entity_id.ok_or_else(|| missing("entity_id"))?;
                let type_tag = desc.type_tag.ok_or_else(|| missing("type_tag"))?;
                let state = desc.state.ok_or_else(|| missing("state"))?;
                if desc.aux_data.is_some() {
                    return Err(unexpected("aux_data"));
                }
                Ok(Mutation::EntityChange {
                    location,
                    entity_id,
                    type_tag,
                    state,
                })
            }
        }
    }
}

/// Deduplication identity of a mutation's subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubjectKey {
    Block { world: String, pos: BlockPos },
    Entity(EntityId),
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKey::Block { world, pos } => write!(f, "block {world}@{pos}"),
            SubjectKey::Entity(id) => write!(f, "entity {id}"),
        }
    }
}
