use std::collections::BTreeSet;
use std::sync::Mutex;

use flint_core::{
    ArenaId, BlockPos, BlockSubject, EntityChangeSubject, EntityCreationSubject, EntityId,
    RecordHeader, RecordId, RollbackRecord, StateBlob,
};
use flint_rollback::{AdapterError, PlatformAdapter};

#[derive(Debug, Clone, PartialEq)]
pub enum Replayed {
    Block {
        id: RecordId,
        pos: BlockPos,
        type_tag: String,
        aux_data: i32,
        state: Option<StateBlob>,
    },
    Removed {
        id: RecordId,
        entity: EntityId,
    },
    Restored {
        id: RecordId,
        entity: EntityId,
        type_tag: String,
        state: Option<StateBlob>,
    },
}

impl Replayed {
    pub fn id(&self) -> RecordId {
        match self {
            Replayed::Block { id, .. } | Replayed::Removed { id, .. } | Replayed::Restored { id, .. } => {
                *id
            }
        }
    }
}

/// Adapter that records every reversal instead of touching a world.
pub struct RecordingAdapter {
    world: Mutex<Option<String>>,
    failing: Mutex<BTreeSet<RecordId>>,
    replayed: Mutex<Vec<Replayed>>,
    cached: Mutex<Vec<(ArenaId, usize)>>,
}

impl RecordingAdapter {
    pub fn in_world(world: &str) -> Self {
        Self {
            world: Mutex::new(Some(world.to_string())),
            failing: Mutex::new(BTreeSet::new()),
            replayed: Mutex::new(Vec::new()),
            cached: Mutex::new(Vec::new()),
        }
    }

    /// `current_world_of` fails until a world is set.
    pub fn without_world() -> Self {
        let adapter = Self::in_world("");
        *adapter.world.lock().unwrap() = None;
        adapter
    }

    pub fn set_world(&self, world: &str) {
        *self.world.lock().unwrap() = Some(world.to_string());
    }

    pub fn fail_on(&self, id: RecordId) {
        self.failing.lock().unwrap().insert(id);
    }

    pub fn replayed(&self) -> Vec<Replayed> {
        self.replayed.lock().unwrap().clone()
    }

    pub fn cached(&self) -> Vec<(ArenaId, usize)> {
        self.cached.lock().unwrap().clone()
    }

    fn push(&self, id: RecordId, call: Replayed) -> Result<(), AdapterError> {
        if self.failing.lock().unwrap().contains(&id) {
            return Err(AdapterError::new(format!("injected failure for record {id}")));
        }
        self.replayed.lock().unwrap().push(call);
        Ok(())
    }
}

impl PlatformAdapter for RecordingAdapter {
    fn current_world_of(&self, arena: &ArenaId) -> Result<String, AdapterError> {
        self.world
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AdapterError::new(format!("arena {arena} has no world")))
    }

    fn rollback_block(
        &self,
        header: &RecordHeader,
        block: &BlockSubject,
        state: Option<&StateBlob>,
    ) -> Result<(), AdapterError> {
        self.push(
            header.id,
            Replayed::Block {
                id: header.id,
                pos: block.pos,
                type_tag: block.type_tag.clone(),
                aux_data: block.aux_data,
                state: state.cloned(),
            },
        )
    }

    fn rollback_entity_creation(
        &self,
        header: &RecordHeader,
        created: &EntityCreationSubject,
    ) -> Result<(), AdapterError> {
        self.push(
            header.id,
            Replayed::Removed {
                id: header.id,
                entity: created.entity_id,
            },
        )
    }

    fn rollback_entity_change(
        &self,
        header: &RecordHeader,
        changed: &EntityChangeSubject,
        state: Option<&StateBlob>,
    ) -> Result<(), AdapterError> {
        self.push(
            header.id,
            Replayed::Restored {
                id: header.id,
                entity: changed.entity_id,
                type_tag: changed.type_tag.clone(),
                state: state.cloned(),
            },
        )
    }

    fn cache_entities_for(
        &self,
        arena: &ArenaId,
        batch: &[RollbackRecord],
    ) -> Result<(), AdapterError> {
        self.cached.lock().unwrap().push((arena.clone(), batch.len()));
        Ok(())
    }
}
