//! Replay path: drain an arena's log, reverse every record, retire the log.

use std::collections::BTreeMap;
use std::sync::Arc;

use flint_core::{ArenaContext, ArenaId, Effect, RecordSubject, RollbackRecord, Transience};
use serde::Serialize;
use thiserror::Error;

use crate::adapter::{AdapterError, PlatformAdapter};
use crate::store::{RecordStore, ScanError, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("no active rollback log for arena {arena}")]
    NoActiveLog { arena: ArenaId },
    #[error("rollback storage failure: {0}")]
    Storage(#[from] StoreError),
    #[error("rollback agent is retired")]
    Retired,
}

impl RollbackError {
    pub fn transience(&self) -> Transience {
        match self {
            RollbackError::NoActiveLog { .. } | RollbackError::Retired => Transience::Permanent,
            RollbackError::Storage(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            RollbackError::NoActiveLog { .. } | RollbackError::Retired => Effect::None,
            // Reached only before any adapter call or after all of them.
            RollbackError::Storage(_) => Effect::Unknown,
        }
    }
}

/// What one rollback pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Decodable records drained from the log.
    pub records: usize,
    pub restored: usize,
    pub world_mismatches: usize,
    pub adapter_failures: usize,
    /// Records flagged with state whose blob was absent.
    pub missing_state: usize,
    pub corrupt_rows: usize,
    /// Blobs no replayed record claimed.
    pub orphaned_blobs: usize,
}

#[derive(Clone)]
pub struct RollbackEngine {
    records: Arc<dyn RecordStore>,
    states: Arc<dyn StateStore>,
    adapter: Arc<dyn PlatformAdapter>,
}

impl RollbackEngine {
    pub fn new(
        records: Arc<dyn RecordStore>,
        states: Arc<dyn StateStore>,
        adapter: Arc<dyn PlatformAdapter>,
    ) -> Self {
        Self {
            records,
            states,
            adapter,
        }
    }

    /// Reverts every logged mutation for the arena and empties both stores.
    ///
    /// Fails with `NoActiveLog` when the arena has no log. A failed page read
    /// returns before any adapter call, with both stores untouched.
    pub fn pop_rollbacks(&self, ctx: &ArenaContext) -> Result<RollbackReport, RollbackError> {
        let arena = &ctx.arena;
        let span = tracing::info_span!("rollback", %arena);
        let _guard = span.enter();

        if !self.records.has_log(arena)? {
            return Err(RollbackError::NoActiveLog {
                arena: arena.clone(),
            });
        }

        let mut blobs = match self.states.load_all(arena) {
            Ok(blobs) => blobs,
            Err(e) => {
                tracing::warn!("state side store unavailable, restoring without state: {e}");
                BTreeMap::new()
            }
        };

        let mut report = RollbackReport::default();
        let mut batch = Vec::new();
        for item in self.records.scan_all(arena)? {
            match item {
                Ok(record) => batch.push(record),
                Err(ScanError::Corrupt(e)) => {
                    tracing::error!("skipping corrupt rollback record: {e}");
                    report.corrupt_rows += 1;
                }
                Err(ScanError::Store(e)) => return Err(e.into()),
            }
        }
        report.records = batch.len();

        if let Err(e) = self.adapter.cache_entities_for(arena, &batch) {
            tracing::debug!("entity prefetch failed: {e}");
        }

        let current_world = match self.adapter.current_world_of(arena) {
            Ok(world) => world,
            Err(e) => {
                tracing::warn!(
                    world = %ctx.world,
                    "could not query arena world, using configured world: {e}"
                );
                ctx.world.clone()
            }
        };

        for record in &batch {
            let blob = blobs.remove(&record.id());
            if record.world() != current_world {
                tracing::info!(
                    record = %record.id(),
                    record_world = record.world(),
                    arena_world = %current_world,
                    "record world does not match arena world, not rolling back"
                );
                report.world_mismatches += 1;
                continue;
            }
            let state = if record.has_state() {
                if blob.is_none() {
                    tracing::warn!(
                        record = %record.id(),
                        kind = %record.kind(),
                        "state blob missing for flagged record, restoring without it"
                    );
                    report.missing_state += 1;
                }
                blob
            } else {
                None
            };

            match self.replay(record, state.as_ref()) {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    tracing::error!(
                        record = %record.id(),
                        kind = %record.kind(),
                        "failed to roll back record: {e}"
                    );
                    report.adapter_failures += 1;
                }
            }
        }

        report.orphaned_blobs = blobs.len();
        if report.orphaned_blobs > 0 {
            tracing::warn!(count = report.orphaned_blobs, "discarding unreferenced state blobs");
        }

        // Both stores are retired even when one of them fails.
        let dropped = self.records.drop_log(arena);
        let cleared = self.states.clear(arena);
        if let Err(e) = &dropped {
            tracing::error!("failed to drop rollback log: {e}");
        }
        if let Err(e) = &cleared {
            tracing::error!("failed to clear state blobs: {e}");
        }
        dropped?;
        cleared?;

        tracing::info!(
            records = report.records,
            restored = report.restored,
            world_mismatches = report.world_mismatches,
            adapter_failures = report.adapter_failures,
            missing_state = report.missing_state,
            corrupt_rows = report.corrupt_rows,
            "rollback complete"
        );
        Ok(report)
    }

    fn replay(
        &self,
        record: &RollbackRecord,
        state: Option<&flint_core::StateBlob>,
    ) -> Result<(), AdapterError> {
        let header = &record.header;
        match &record.subject {
            RecordSubject::Block(block) => self.adapter.rollback_block(header, block, state),
            RecordSubject::EntityCreation(created) => {
                self.adapter.rollback_entity_creation(header, created)
            }
            RecordSubject::EntityChange(changed) => {
                self.adapter.rollback_entity_change(header, changed, state)
            }
        }
    }
}
