//! Logged mutation records and their flat persisted row shape.

use serde::{Deserialize, Serialize};

use crate::error::RecordDecodeError;
use crate::identity::{EntityId, RecordId};
use crate::location::{BlockPos, Location3D};
use crate::mutation::{MutationKind, SubjectKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSubject {
    pub pos: BlockPos,
    pub type_tag: String,
    pub aux_data: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityCreationSubject {
    pub entity_id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<(f64, f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityChangeSubject {
    pub entity_id: EntityId,
    pub position: (f64, f64, f64),
    pub type_tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordSubject {
    Block(BlockSubject),
    EntityCreation(EntityCreationSubject),
    EntityChange(EntityChangeSubject),
}

impl RecordSubject {
    pub fn kind(&self) -> MutationKind {
        match self {
            RecordSubject::Block(_) => MutationKind::BlockChange,
            RecordSubject::EntityCreation(_) => MutationKind::EntityCreation,
            RecordSubject::EntityChange(_) => MutationKind::EntityChange,
        }
    }

    pub fn subject_key(&self, world: &str) -> SubjectKey {
        match self {
            RecordSubject::Block(block) => SubjectKey::Block {
                world: world.to_string(),
                pos: block.pos,
            },
            RecordSubject::EntityCreation(created) => SubjectKey::Entity(created.entity_id),
            RecordSubject::EntityChange(changed) => SubjectKey::Entity(changed.entity_id),
        }
    }
}

/// Fields shared by every record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    pub id: RecordId,
    pub world: String,
    pub has_state: bool,
}

/// A record as read back from a log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackRecord {
    #[serde(flatten)]
    pub header: RecordHeader,
    pub subject: RecordSubject,
}

impl RollbackRecord {
    pub fn id(&self) -> RecordId {
        self.header.id
    }

    pub fn kind(&self) -> MutationKind {
        self.subject.kind()
    }

    pub fn world(&self) -> &str {
        &self.header.world
    }

    pub fn has_state(&self) -> bool {
        self.header.has_state
    }

    pub fn subject_key(&self) -> SubjectKey {
        self.subject.subject_key(&self.header.world)
    }

    /// Where the subject was when the mutation was logged, if known.
    pub fn location(&self) -> Option<Location3D> {
        let world = self.header.world.clone();
        match &self.subject {
            RecordSubject::Block(block) => Some(block.pos.to_location(world)),
            RecordSubject::EntityCreation(created) => created
                .position
                .map(|(x, y, z)| Location3D::in_world(world, x, y, z)),
            RecordSubject::EntityChange(changed) => {
                let (x, y, z) = changed.position;
                Some(Location3D::in_world(world, x, y, z))
            }
        }
    }

    /// Decodes one persisted row. Columns that contradict `record_type`
    /// make the row corrupt.
    pub fn from_row(id: RecordId, row: RecordRow) -> Result<Self, RecordDecodeError> {
        let corrupt = |reason: String| RecordDecodeError { id, reason };
        let kind = MutationKind::from_ordinal(row.record_type)
            .ok_or_else(|| corrupt(format!("unknown record_type {}", row.record_type)))?;
        let position = match (row.x, row.y, row.z) {
            (Some(x), Some(y), Some(z)) => Some((x, y, z)),
            (None, None, None) => None,
            _ => return Err(corrupt("partially null coordinates".into())),
        };
        let entity_id = match row.uuid.as_deref() {
            Some(raw) => Some(
                EntityId::parse_str(raw).map_err(|err| corrupt(err.to_string()))?,
            ),
            None => None,
        };

        let subject = match kind {
            MutationKind::BlockChange => {
                let (x, y, z) =
                    position.ok_or_else(|| corrupt("block change without coordinates".into()))?;
                let type_tag = row
                    .type_tag
                    .ok_or_else(|| corrupt("block change without type".into()))?;
                let aux_data = i32::try_from(row.data)
                    .map_err(|_| corrupt(format!("data {} out of range", row.data)))?;
                RecordSubject::Block(BlockSubject {
                    pos: Location3D::new(None, x, y, z).block_pos(),
                    type_tag,
                    aux_data,
                })
            }
            MutationKind::EntityCreation => {
                let entity_id =
                    entity_id.ok_or_else(|| corrupt("entity creation without uuid".into()))?;
                RecordSubject::EntityCreation(EntityCreationSubject {
                    entity_id,
                    position,
                })
            }
            MutationKind::EntityChange => {
                let entity_id =
                    entity_id.ok_or_else(|| corrupt("entity change without uuid".into()))?;
                let position =
                    position.ok_or_else(|| corrupt("entity change without coordinates".into()))?;
                let type_tag = row
                    .type_tag
                    .ok_or_else(|| corrupt("entity change without type".into()))?;
                RecordSubject::EntityChange(EntityChangeSubject {
                    entity_id,
                    position,
                    type_tag,
                })
            }
        };

        Ok(Self {
            header: RecordHeader {
                id,
                world: row.world,
                has_state: row.state,
            },
            subject,
        })
    }
}

/// A record waiting for its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub world: String,
    pub has_state: bool,
    pub subject: RecordSubject,
}

impl NewRecord {
    pub fn kind(&self) -> MutationKind {
        self.subject.kind()
    }

    pub fn subject_key(&self) -> SubjectKey {
        self.subject.subject_key(&self.world)
    }

    pub fn into_record(self, id: RecordId) -> RollbackRecord {
        RollbackRecord {
            header: RecordHeader {
                id,
                world: self.world,
                has_state: self.has_state,
            },
            subject: self.subject,
        }
    }

    pub fn to_row(&self) -> RecordRow {
        let (position, uuid, type_tag, data) = match &self.subject {
            RecordSubject::Block(block) => (
                Some((
                    f64::from(block.pos.x),
                    f64::from(block.pos.y),
                    f64::from(block.pos.z),
                )),
                None,
                Some(block.type_tag.clone()),
                i64::from(block.aux_data),
            ),
            RecordSubject::EntityCreation(created) => {
                (created.position, Some(created.entity_id.to_string()), None, 0)
            }
            RecordSubject::EntityChange(changed) => (
                Some(changed.position),
                Some(changed.entity_id.to_string()),
                Some(changed.type_tag.clone()),
                0,
            ),
        };
        let (x, y, z) = match position {
            Some((x, y, z)) => (Some(x), Some(y), Some(z)),
            None => (None, None, None),
        };
        RecordRow {
            world: self.world.clone(),
            x,
            y,
            z,
            uuid,
            type_tag,
            data,
            state: self.has_state,
            record_type: self.kind().ordinal(),
        }
    }
}

/// Column-for-column image of one log row, minus the id.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordRow {
    pub world: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub uuid: Option<String>,
    pub type_tag: Option<String>,
    pub data: i64,
    pub state: bool,
    pub record_type: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn block_row() -> RecordRow {
        RecordRow {
            world: "w".into(),
            x: Some(1.0),
            y: Some(2.0),
            z: Some(3.0),
            uuid: None,
            type_tag: Some("stone".into()),
            data: 4,
            state: false,
            record_type: 0,
        }
    }

    #[test]
    fn decodes_block_row() {
        let record = RollbackRecord::from_row(RecordId::new(9), block_row()).unwrap();
        assert_eq!(record.kind(), MutationKind::BlockChange);
        assert_eq!(
            record.subject,
            RecordSubject::Block(BlockSubject {
                pos: BlockPos::new(1, 2, 3),
                type_tag: "stone".into(),
                aux_data: 4,
            })
        );
    }

    #[test]
    fn contradictory_rows_are_corrupt_not_panics() {
        let mut row = block_row();
        row.type_tag = None;
        assert!(RollbackRecord::from_row(RecordId::new(1), row).is_err());

        let mut row = block_row();
        row.record_type = 7;
        let err = RollbackRecord::from_row(RecordId::new(2), row).unwrap_err();
        assert_eq!(err.id, RecordId::new(2));

        let mut row = block_row();
        row.record_type = MutationKind::EntityChange.ordinal();
        row.uuid = Some("garbage".into());
        assert!(RollbackRecord::from_row(RecordId::new(3), row).is_err());

        let mut row = block_row();
        row.y = None;
        assert!(RollbackRecord::from_row(RecordId::new(4), row).is_err());
    }

    #[test]
    fn entity_creation_row_without_position() {
        let new = NewRecord {
            world: "w".into(),
            has_state: false,
            subject: RecordSubject::EntityCreation(EntityCreationSubject {
                entity_id: EntityId::new(Uuid::from_u128(3)),
                position: None,
            }),
        };
        let row = new.to_row();
        assert_eq!(row.x, None);
        assert_eq!(row.record_type, 1);
        let back = RollbackRecord::from_row(RecordId::new(1), row).unwrap();
        assert_eq!(back, new.into_record(RecordId::new(1)));
        assert_eq!(back.location(), None);
    }
}
