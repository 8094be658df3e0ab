//! Operator views over a data root: pending logs, their records, manual discard.

use std::collections::{BTreeMap, BTreeSet};

use flint_core::{ArenaId, RecordId, RollbackRecord, StateBlob};
use serde::Serialize;

use crate::store::{RecordStore, ScanError, StateStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArenaStatus {
    pub arena: ArenaId,
    /// `None` when the arena only has a state group.
    pub records: Option<u64>,
    pub state_blobs: usize,
}

/// Every arena with a log or a state group.
pub fn status(
    records: &dyn RecordStore,
    states: &dyn StateStore,
) -> Result<Vec<ArenaStatus>, StoreError> {
    let logs: BTreeSet<ArenaId> = records.active_logs()?.into_iter().collect();
    let groups = states.groups()?;
    let arenas: BTreeSet<&ArenaId> = logs.iter().chain(groups.keys()).collect();

    arenas
        .into_iter()
        .map(|arena| -> Result<ArenaStatus, StoreError> {
            let count = if logs.contains(arena) {
                Some(records.count(arena)?)
            } else {
                None
            };
            Ok(ArenaStatus {
                arena: arena.clone(),
                records: count,
                state_blobs: groups.get(arena).copied().unwrap_or(0),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ShownRecord {
    #[serde(flatten)]
    pub record: RollbackRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<StateBlob>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArenaLog {
    pub arena: ArenaId,
    pub records: Vec<ShownRecord>,
    /// Ids of rows that could not be decoded.
    pub corrupt: Vec<RecordId>,
}

/// Reads an arena's pending log without modifying it.
pub fn show(
    records: &dyn RecordStore,
    states: &dyn StateStore,
    arena: &ArenaId,
) -> Result<ArenaLog, StoreError> {
    let mut blobs: BTreeMap<RecordId, StateBlob> = match states.load_all(arena) {
        Ok(blobs) => blobs,
        Err(StoreError::StateGroupMissing { .. }) => BTreeMap::new(),
        Err(e) => return Err(e),
    };
    let mut log = ArenaLog {
        arena: arena.clone(),
        records: Vec::new(),
        corrupt: Vec::new(),
    };
    for item in records.scan_all(arena)? {
        match item {
            Ok(record) => {
                let state = blobs.remove(&record.id());
                log.records.push(ShownRecord { record, state });
            }
            Err(ScanError::Corrupt(e)) => log.corrupt.push(e.id),
            Err(ScanError::Store(e)) => return Err(e),
        }
    }
    Ok(log)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscardReport {
    pub arena: ArenaId,
    pub had_log: bool,
    pub records: u64,
    pub state_blobs: usize,
}

/// Retires an arena's log and state group without replaying anything.
pub fn discard(
    records: &dyn RecordStore,
    states: &dyn StateStore,
    arena: &ArenaId,
) -> Result<DiscardReport, StoreError> {
    let had_log = records.has_log(arena)?;
    let count = if had_log { records.count(arena)? } else { 0 };
    let state_blobs = states.groups()?.get(arena).copied().unwrap_or(0);
    records.drop_log(arena)?;
    states.clear(arena)?;
    tracing::warn!(%arena, records = count, state_blobs, "discarded rollback log without replay");
    Ok(DiscardReport {
        arena: arena.clone(),
        had_log,
        records: count,
        state_blobs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use flint_core::{ArenaContext, Location3D, MutationDescription};

    use crate::logger::ChangeLogger;
    use crate::store::{MemoryRecordStore, MemoryStateStore};

    fn seeded() -> (Arc<MemoryRecordStore>, Arc<MemoryStateStore>, ArenaId) {
        let records = Arc::new(MemoryRecordStore::new());
        let states = Arc::new(MemoryStateStore::new());
        let logger = ChangeLogger::new(records.clone(), states.clone());
        let ctx = ArenaContext::new(ArenaId::new("arena1").unwrap(), "w");
        logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 0.0, 0.0, 0.0), "chest")
                    .with_state(StateBlob::text("items")),
            )
            .unwrap();
        logger
            .log_change(
                &ctx,
                MutationDescription::block_change(Location3D::new(None, 1.0, 0.0, 0.0), "dirt"),
            )
            .unwrap();
        (records, states, ctx.arena)
    }

    #[test]
    fn status_lists_logs_and_orphan_groups() {
        let (records, states, arena) = seeded();
        let stray = ArenaId::new("stray").unwrap();
        states.ensure_initialized(&stray).unwrap();

        let rows = status(records.as_ref(), states.as_ref()).unwrap();
        assert_eq!(
            rows,
            vec![
                ArenaStatus {
                    arena,
                    records: Some(2),
                    state_blobs: 1
                },
                ArenaStatus {
                    arena: stray,
                    records: None,
                    state_blobs: 0
                },
            ]
        );
    }

    #[test]
    fn show_pairs_records_with_state_and_leaves_log_intact() {
        let (records, states, arena) = seeded();
        let log = show(records.as_ref(), states.as_ref(), &arena).unwrap();
        assert_eq!(log.records.len(), 2);
        assert_eq!(log.records[0].state, Some(StateBlob::text("items")));
        assert_eq!(log.records[1].state, None);
        assert_eq!(records.count(&arena).unwrap(), 2);

        let json = serde_json::to_value(&log).unwrap();
        assert_eq!(json["records"][0]["state"], "items");
        assert_eq!(json["records"][0]["subject"]["kind"], "block");
    }

    #[test]
    fn discard_retires_both_stores() {
        let (records, states, arena) = seeded();
        let report = discard(records.as_ref(), states.as_ref(), &arena).unwrap();
        assert!(report.had_log);
        assert_eq!(report.records, 2);
        assert_eq!(report.state_blobs, 1);
        assert!(status(records.as_ref(), states.as_ref()).unwrap().is_empty());

        let again = discard(records.as_ref(), states.as_ref(), &arena).unwrap();
        assert!(!again.had_log);
    }
}
