//! Write path: validate, deduplicate, append.

use std::sync::Arc;

use flint_core::{
    ArenaContext, Effect, InvalidMutation, Mutation, MutationDescription, RecordId, Transience,
};
use thiserror::Error;

use crate::store::{RecordStore, StateStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Recorded(RecordId),
    /// The subject already has a record this round; nothing was written.
    Deduplicated,
}

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid mutation description: {0}")]
    InvalidMutationDescription(#[from] InvalidMutation),
    #[error("rollback log write failed: {0}")]
    Storage(#[from] StoreError),
    #[error("rollback agent is retired")]
    Retired,
}

impl LogError {
    pub fn transience(&self) -> Transience {
        match self {
            LogError::InvalidMutationDescription(_) | LogError::Retired => Transience::Permanent,
            LogError::Storage(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            LogError::InvalidMutationDescription(_) | LogError::Retired => Effect::None,
            LogError::Storage(e) => e.effect(),
        }
    }
}

/// The only writer of rollback records.
///
/// Shared across arenas; each call names its arena through the context.
/// Calls for one arena must be serialized by the caller.
#[derive(Clone)]
pub struct ChangeLogger {
    records: Arc<dyn RecordStore>,
    states: Arc<dyn StateStore>,
}

impl ChangeLogger {
    pub fn new(records: Arc<dyn RecordStore>, states: Arc<dyn StateStore>) -> Self {
        Self { records, states }
    }

    pub fn log_change(
        &self,
        ctx: &ArenaContext,
        description: MutationDescription,
    ) -> Result<LogOutcome, LogError> {
        let mutation = Mutation::try_from(description)?;
        self.log_mutation(ctx, mutation)
    }

    pub fn log_mutation(
        &self,
        ctx: &ArenaContext,
        mutation: Mutation,
    ) -> Result<LogOutcome, LogError> {
        let arena = &ctx.arena;
        let key = mutation.subject_key(&ctx.world);
        if self.records.dedupe_lookup(arena, &key)? {
            tracing::trace!(%arena, subject = %key, "subject already logged");
            return Ok(LogOutcome::Deduplicated);
        }

        if !self.records.has_log(arena)? {
            // Blobs left over from an earlier round would collide with the
            // ids the fresh log hands out.
            tracing::debug!(%arena, "opening rollback log");
            self.records.ensure_initialized(arena)?;
            self.states.clear(arena)?;
            self.states.ensure_initialized(arena)?;
        }

        let kind = mutation.kind();
        let (record, state) = mutation.into_record(&ctx.world);
        let id = self.records.append(arena, &record)?;
        if let Some(blob) = state
            && let Err(e) = self.states.put(arena, id, &blob)
        {
            // The record stays flagged; replay degrades to scalar restoration.
            tracing::warn!(%arena, record = %id, "failed to store state blob: {e}");
            return Err(e.into());
        }
        tracing::trace!(%arena, record = %id, %kind, subject = %key, "logged mutation");
        Ok(LogOutcome::Recorded(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use flint_core::{
        ArenaId, EntityId, Location3D, MutationKind, RecordSubject, StateBlob, SubjectKey,
    };
    use uuid::Uuid;

    use crate::store::{MemoryRecordStore, MemoryStateStore, RecordScan};

    fn ctx() -> ArenaContext {
        ArenaContext::new(ArenaId::new("arena1").unwrap(), "w")
    }

    fn stores() -> (Arc<MemoryRecordStore>, Arc<MemoryStateStore>, ChangeLogger) {
        let records = Arc::new(MemoryRecordStore::new());
        let states = Arc::new(MemoryStateStore::new());
        let logger = ChangeLogger::new(records.clone(), states.clone());
        (records, states, logger)
    }

    fn drain(scan: RecordScan<'_>) -> Vec<flint_core::RollbackRecord> {
        scan.map(|item| item.unwrap()).collect()
    }

    #[test]
    fn first_write_opens_both_stores() {
        let (records, states, logger) = stores();
        let ctx = ctx();
        assert!(!records.has_log(&ctx.arena).unwrap());
        let outcome = logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 1.0, 2.0, 3.0), "stone"),
            )
            .unwrap();
        assert_eq!(outcome, LogOutcome::Recorded(RecordId::new(1)));
        assert!(records.has_log(&ctx.arena).unwrap());
        assert!(states.load_all(&ctx.arena).unwrap().is_empty());
        let logged = drain(records.scan_all(&ctx.arena).unwrap());
        assert_eq!(logged[0].world(), "w");
    }

    #[test]
    fn first_write_discards_stale_state_group() {
        let (records, states, logger) = stores();
        let ctx = ctx();
        states
            .put(&ctx.arena, RecordId::new(1), &StateBlob::text("left over"))
            .unwrap();

        let outcome = logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 1.0, 2.0, 3.0), "stone"),
            )
            .unwrap();
        assert_eq!(outcome, LogOutcome::Recorded(RecordId::new(1)));
        assert!(records.has_log(&ctx.arena).unwrap());
        assert!(states.load_all(&ctx.arena).unwrap().is_empty());
    }

    #[test]
    fn second_change_to_same_block_is_deduplicated() {
        let (records, _states, logger) = stores();
        let ctx = ctx();
        let at = Location3D::in_world("w", 1.2, 2.0, 3.9);
        logger
            .log_change(&ctx, MutationDescription::block_change(at.clone(), "stone"))
            .unwrap();
        let again = logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::in_world("w", 1.8, 2.5, 3.1), "dirt"),
            )
            .unwrap();
        assert_eq!(again, LogOutcome::Deduplicated);
        assert_eq!(records.count(&ctx.arena).unwrap(), 1);
        let logged = drain(records.scan_all(&ctx.arena).unwrap());
        assert!(matches!(&logged[0].subject, RecordSubject::Block(b) if b.type_tag == "stone"));
    }

    #[test]
    fn entity_change_after_creation_is_deduplicated() {
        let (records, states, logger) = stores();
        let ctx = ctx();
        let entity = EntityId::new(Uuid::from_u128(5));
        logger
            .log_change(&ctx, MutationDescription::entity_creation(entity))
            .unwrap();
        let outcome = logger
            .log_change(
                &ctx,
                MutationDescription::entity_change(
                    Location3D::in_world("w", 0.0, 0.0, 0.0),
                    entity,
                    "sheep",
                    StateBlob::text("{Color:1}"),
                ),
            )
            .unwrap();
        assert_eq!(outcome, LogOutcome::Deduplicated);
        assert_eq!(records.count(&ctx.arena).unwrap(), 1);
        assert!(states.load_all(&ctx.arena).unwrap().is_empty());
    }

    #[test]
    fn state_blob_is_keyed_by_new_record_id() {
        let (records, states, logger) = stores();
        let ctx = ctx();
        logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 0.0, 0.0, 0.0), "dirt"),
            )
            .unwrap();
        let outcome = logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 9.0, 0.0, 0.0), "chest")
                    .with_state(StateBlob::text("inventory")),
            )
            .unwrap();
        assert_eq!(outcome, LogOutcome::Recorded(RecordId::new(2)));
        let blobs: BTreeMap<_, _> = states.load_all(&ctx.arena).unwrap();
        assert_eq!(blobs.keys().copied().collect::<Vec<_>>(), vec![RecordId::new(2)]);
        let logged = drain(records.scan_all(&ctx.arena).unwrap());
        assert!(!logged[0].has_state());
        assert!(logged[1].has_state());
    }

    #[test]
    fn invalid_description_writes_nothing() {
        let (records, _states, logger) = stores();
        let ctx = ctx();
        let err = logger
            .log_change(&ctx, MutationDescription::new(MutationKind::EntityChange))
            .unwrap_err();
        assert!(matches!(err, LogError::InvalidMutationDescription(_)));
        assert_eq!(err.transience(), Transience::Permanent);
        assert!(!records.has_log(&ctx.arena).unwrap());
    }

    #[test]
    fn default_world_feeds_the_subject_key() {
        let (records, _states, logger) = stores();
        let ctx = ctx();
        logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 4.0, 4.0, 4.0), "sand"),
            )
            .unwrap();
        let key = SubjectKey::Block {
            world: "w".into(),
            pos: flint_core::BlockPos::new(4, 4, 4),
        };
        assert!(records.dedupe_lookup(&ctx.arena, &key).unwrap());
        let explicit = logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::in_world("w", 4.0, 4.0, 4.0), "gravel"),
            )
            .unwrap();
        assert_eq!(explicit, LogOutcome::Deduplicated);
    }
}
