//! Wiring: one locked data root, its two stores, and handles over them.

use std::sync::Arc;

use flint_core::ArenaContext;

use crate::adapter::PlatformAdapter;
use crate::agent::RollbackAgent;
use crate::config::{Config, StoreConfig};
use crate::engine::RollbackEngine;
use crate::logger::ChangeLogger;
use crate::paths::{self, DataRoot};
use crate::store::{JsonStateStore, RecordStore, SqliteRecordStore, StateStore};
use crate::store_lock::DataRootLock;
use crate::Result;

pub struct RollbackService {
    root: DataRoot,
    records: Arc<SqliteRecordStore>,
    states: Arc<JsonStateStore>,
    _lock: DataRootLock,
}

impl RollbackService {
    /// Opens the data root named by `config` (after env/test overrides).
    pub fn open(config: &Config) -> Result<Self> {
        let root = DataRoot::new(paths::data_dir(config.paths.data_dir.as_deref()));
        Self::open_at(root, &config.store)
    }

    pub fn open_at(root: DataRoot, store: &StoreConfig) -> Result<Self> {
        let lock = DataRootLock::acquire(&root)?;
        let records = Arc::new(SqliteRecordStore::open(
            &root.records_path(),
            store.sqlite_options(),
        )?);
        let states = Arc::new(JsonStateStore::open(&root.state_path())?);
        tracing::debug!(dir = %root.dir().display(), "rollback data root opened");
        Ok(Self {
            root,
            records,
            states,
            _lock: lock,
        })
    }

    pub fn root(&self) -> &DataRoot {
        &self.root
    }

    pub fn records(&self) -> Arc<dyn RecordStore> {
        self.records.clone()
    }

    pub fn states(&self) -> Arc<dyn StateStore> {
        self.states.clone()
    }

    pub fn logger(&self) -> ChangeLogger {
        ChangeLogger::new(self.records(), self.states())
    }

    pub fn engine(&self, adapter: Arc<dyn PlatformAdapter>) -> RollbackEngine {
        RollbackEngine::new(self.records(), self.states(), adapter)
    }

    pub fn agent(&self, ctx: ArenaContext, adapter: Arc<dyn PlatformAdapter>) -> RollbackAgent {
        RollbackAgent::new(ctx, self.logger(), self.engine(adapter))
    }
}
