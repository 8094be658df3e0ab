//! Record log and state side store: traits, errors, and the paged scan.

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;

use flint_core::{
    ArenaId, Effect, NewRecord, RecordDecodeError, RecordId, RollbackRecord, StateBlob,
    SubjectKey, Transience,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;
pub mod sqlite;
pub mod state;

pub use memory::{MemoryRecordStore, MemoryStateStore};
pub use sqlite::SqliteRecordStore;
pub use state::JsonStateStore;

pub const DEFAULT_SCAN_PAGE_SIZE: usize = 512;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("store file corrupted at {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
    #[error("no state group for arena {arena}")]
    StateGroupMissing { arena: ArenaId },
    #[error("no rollback log for arena {arena}")]
    NoSuchLog { arena: ArenaId },
    #[error("store lock poisoned")]
    Poisoned,
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                Transience::Retryable
            }
            StoreError::Sqlite(_) | StoreError::Io { .. } => Transience::Unknown,
            StoreError::Symlink { .. }
            | StoreError::Json(_)
            | StoreError::Corrupt { .. }
            | StoreError::StateGroupMissing { .. }
            | StoreError::NoSuchLog { .. }
            | StoreError::Poisoned => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            StoreError::Sqlite(_) | StoreError::Io { .. } | StoreError::Poisoned => {
                Effect::Unknown
            }
            _ => Effect::None,
        }
    }
}

/// Item-level failure while draining a [`RecordScan`].
#[derive(Debug, Error)]
pub enum ScanError {
    /// One row could not be decoded; the scan continues past it.
    #[error(transparent)]
    Corrupt(#[from] RecordDecodeError),
    /// A page read failed; the scan ends.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Durability of the record database (maps to SQLite `synchronous`).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreDurability {
    #[default]
    Cache,
    Durable,
}

impl StoreDurability {
    pub(crate) fn synchronous_value(self) -> &'static str {
        match self {
            StoreDurability::Cache => "NORMAL",
            StoreDurability::Durable => "FULL",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cache" => Some(StoreDurability::Cache),
            "durable" => Some(StoreDurability::Durable),
            _ => None,
        }
    }
}

/// Append-only, per-arena mutation log.
pub trait RecordStore: Send + Sync {
    /// Creates the arena's log if absent. Never touches existing records.
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError>;
    fn has_log(&self, arena: &ArenaId) -> Result<bool, StoreError>;
    /// Whether a record for `key` is already logged. False when the arena has no log.
    fn dedupe_lookup(&self, arena: &ArenaId, key: &SubjectKey) -> Result<bool, StoreError>;
    fn append(&self, arena: &ArenaId, record: &NewRecord) -> Result<RecordId, StoreError>;
    /// Lazily pages through the log in insertion order.
    fn scan_all(&self, arena: &ArenaId) -> Result<RecordScan<'_>, StoreError>;
    /// Deletes the arena's log. A missing log is not an error.
    fn drop_log(&self, arena: &ArenaId) -> Result<(), StoreError>;
    fn active_logs(&self) -> Result<Vec<ArenaId>, StoreError>;
    fn count(&self, arena: &ArenaId) -> Result<u64, StoreError>;
}

/// Blob store keyed by record id, grouped per arena.
pub trait StateStore: Send + Sync {
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError>;
    fn put(&self, arena: &ArenaId, id: RecordId, blob: &StateBlob) -> Result<(), StoreError>;
    fn load_all(&self, arena: &ArenaId) -> Result<BTreeMap<RecordId, StateBlob>, StoreError>;
    /// Removes the arena's whole group. Idempotent.
    fn clear(&self, arena: &ArenaId) -> Result<(), StoreError>;
    /// Arena groups present in the store with their blob counts.
    fn groups(&self) -> Result<BTreeMap<ArenaId, usize>, StoreError>;
}

pub(crate) type PageItem = Result<RollbackRecord, RecordDecodeError>;

/// One keyset-paged source of log rows.
pub(crate) trait PageSource {
    /// Rows with id strictly greater than `after`, ascending, at most `limit`.
    fn fetch(&mut self, after: Option<RecordId>, limit: usize) -> Result<Vec<PageItem>, StoreError>;
}

/// Lazy, finite, non-restartable scan over one arena's log.
///
/// Must be drained before the log is dropped.
pub struct RecordScan<'a> {
    source: Box<dyn PageSource + 'a>,
    buffer: VecDeque<PageItem>,
    cursor: Option<RecordId>,
    page_size: usize,
    exhausted: bool,
}

impl<'a> RecordScan<'a> {
    pub(crate) fn new(source: Box<dyn PageSource + 'a>, page_size: usize) -> Self {
        Self {
            source,
            buffer: VecDeque::new(),
            cursor: None,
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    fn refill(&mut self) -> Result<(), StoreError> {
        let page = self.source.fetch(self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some(match last {
                Ok(record) => record.id(),
                Err(err) => err.id,
            });
        }
        self.buffer.extend(page);
        Ok(())
    }
}

impl Iterator for RecordScan<'_> {
    type Item = Result<RollbackRecord, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.refill() {
                self.exhausted = true;
                return Some(Err(ScanError::Store(err)));
            }
        }
        self.buffer
            .pop_front()
            .map(|item| item.map_err(ScanError::Corrupt))
    }
}

impl std::iter::FusedIterator for RecordScan<'_> {}
