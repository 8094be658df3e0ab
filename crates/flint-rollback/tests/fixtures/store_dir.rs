use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use flint_rollback::config::StoreConfig;
use flint_rollback::paths::DataRoot;
use flint_rollback::{
    JsonStateStore, MemoryRecordStore, MemoryStateStore, RecordStore, RollbackService,
    SqliteRecordStore, StateStore,
};
use flint_rollback::store::sqlite::SqliteOptions;

/// Which backend pair a scenario runs against.
#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Disk,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Disk];

/// A record store and state store pair, with the temp dir kept alive for disk stores.
pub struct Stores {
    pub records: Arc<dyn RecordStore>,
    pub states: Arc<dyn StateStore>,
    _temp: Option<TempDir>,
}

impl Stores {
    pub fn open(backend: Backend) -> Self {
        match backend {
            Backend::Memory => Self::memory(),
            Backend::Disk => Self::disk(),
        }
    }

    pub fn memory() -> Self {
        Self {
            records: Arc::new(MemoryRecordStore::with_page_size(2)),
            states: Arc::new(MemoryStateStore::new()),
            _temp: None,
        }
    }

    pub fn disk() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let root = DataRoot::new(temp.path());
        let options = SqliteOptions {
            scan_page_size: 2,
            ..SqliteOptions::default()
        };
        let records =
            SqliteRecordStore::open(&root.records_path(), options).expect("open record store");
        let states = JsonStateStore::open(&root.state_path()).expect("open state store");
        Self {
            records: Arc::new(records),
            states: Arc::new(states),
            _temp: Some(temp),
        }
    }
}

/// A temp data root opened through the service, as the binary does.
pub struct TempService {
    pub temp: TempDir,
    pub service: RollbackService,
}

impl TempService {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let service = Self::open_at(temp.path());
        Self { temp, service }
    }

    pub fn open_at(dir: &Path) -> RollbackService {
        RollbackService::open_at(DataRoot::new(dir), &StoreConfig::default())
            .expect("open rollback service")
    }
}
