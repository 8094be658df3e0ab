//! In-process stores with the same semantics as the durable ones.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use flint_core::{ArenaId, NewRecord, RecordId, RollbackRecord, StateBlob, SubjectKey};

use super::{
    DEFAULT_SCAN_PAGE_SIZE, PageItem, PageSource, RecordScan, RecordStore, StateStore, StoreError,
};

#[derive(Default)]
struct MemoryLog {
    last_id: u64,
    records: Vec<RollbackRecord>,
    subjects: HashSet<SubjectKey>,
}

#[derive(Clone)]
pub struct MemoryRecordStore {
    logs: Arc<RwLock<BTreeMap<ArenaId, MemoryLog>>>,
    page_size: usize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_SCAN_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            logs: Arc::new(RwLock::new(BTreeMap::new())),
            page_size,
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, BTreeMap<ArenaId, MemoryLog>>, StoreError> {
        self.logs.read().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, BTreeMap<ArenaId, MemoryLog>>, StoreError> {
        self.logs.write().map_err(|_| StoreError::Poisoned)
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for MemoryRecordStore {
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError> {
        self.write()?.entry(arena.clone()).or_default();
        Ok(())
    }

    fn has_log(&self, arena: &ArenaId) -> Result<bool, StoreError> {
        Ok(self.read()?.contains_key(arena))
    }

    fn dedupe_lookup(&self, arena: &ArenaId, key: &SubjectKey) -> Result<bool, StoreError> {
        Ok(self
            .read()?
            .get(arena)
            .is_some_and(|log| log.subjects.contains(key)))
    }

    fn append(&self, arena: &ArenaId, record: &NewRecord) -> Result<RecordId, StoreError> {
        let mut logs = self.write()?;
        let log = logs.get_mut(arena).ok_or_else(|| StoreError::NoSuchLog {
            arena: arena.clone(),
        })?;
        log.last_id += 1;
        let id = RecordId::new(log.last_id);
        log.subjects.insert(record.subject_key());
        log.records.push(record.clone().into_record(id));
        Ok(id)
    }

    fn scan_all(&self, arena: &ArenaId) -> Result<RecordScan<'_>, StoreError> {
        if !self.has_log(arena)? {
            return Err(StoreError::NoSuchLog {
                arena: arena.clone(),
            });
        }
        let source = MemoryPages {
            logs: self.logs.as_ref(),
            arena: arena.clone(),
        };
        Ok(RecordScan::new(Box::new(source), self.page_size))
    }

    fn drop_log(&self, arena: &ArenaId) -> Result<(), StoreError> {
        self.write()?.remove(arena);
        Ok(())
    }

    fn active_logs(&self) -> Result<Vec<ArenaId>, StoreError> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn count(&self, arena: &ArenaId) -> Result<u64, StoreError> {
        self.read()?
            .get(arena)
            .map(|log| log.records.len() as u64)
            .ok_or_else(|| StoreError::NoSuchLog {
                arena: arena.clone(),
            })
    }
}

struct MemoryPages<'a> {
    logs: &'a RwLock<BTreeMap<ArenaId, MemoryLog>>,
    arena: ArenaId,
}

impl PageSource for MemoryPages<'_> {
    fn fetch(&mut self, after: Option<RecordId>, limit: usize) -> Result<Vec<PageItem>, StoreError> {
        let logs = self.logs.read().map_err(|_| StoreError::Poisoned)?;
        let Some(log) = logs.get(&self.arena) else {
            return Err(StoreError::NoSuchLog {
                arena: self.arena.clone(),
            });
        };
        Ok(log
            .records
            .iter()
            .filter(|record| after.is_none_or(|after| record.id() > after))
            .take(limit)
            .cloned()
            .map(Ok)
            .collect())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStateStore {
    groups: Arc<RwLock<BTreeMap<ArenaId, BTreeMap<RecordId, StateBlob>>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError> {
        self.groups
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .entry(arena.clone())
            .or_default();
        Ok(())
    }

    fn put(&self, arena: &ArenaId, id: RecordId, blob: &StateBlob) -> Result<(), StoreError> {
        self.groups
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .entry(arena.clone())
            .or_default()
            .insert(id, blob.clone());
        Ok(())
    }

    fn load_all(&self, arena: &ArenaId) -> Result<BTreeMap<RecordId, StateBlob>, StoreError> {
        self.groups
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .get(arena)
            .cloned()
            .ok_or_else(|| StoreError::StateGroupMissing {
                arena: arena.clone(),
            })
    }

    fn clear(&self, arena: &ArenaId) -> Result<(), StoreError> {
        self.groups
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(arena);
        Ok(())
    }

    fn groups(&self) -> Result<BTreeMap<ArenaId, usize>, StoreError> {
        Ok(self
            .groups
            .read()
            .map_err(|_| StoreError::Poisoned)?
            .iter()
            .map(|(arena, group)| (arena.clone(), group.len()))
            .collect())
    }
}
