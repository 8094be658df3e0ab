//! World-mutation change log and rollback engine for Flint arenas.
//!
//! During a round every world mutation inside an arena funnels into
//! [`ChangeLogger::log_change`], which keeps only the first record per
//! subject. When the round ends [`RollbackEngine::pop_rollbacks`] replays the
//! log through a [`PlatformAdapter`] and empties both stores.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod admin;
pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod logger;
pub mod paths;
pub mod service;
pub mod store;
pub mod store_lock;
pub mod telemetry;

pub use flint_core;

pub use adapter::{AdapterError, ArenaDirectory, PlatformAdapter, StaticArenaDirectory, route_change};
pub use agent::{RollbackAgent, RoundCleanup};
pub use engine::{RollbackEngine, RollbackError, RollbackReport};
pub use error::{Effect, Error, Result, Transience};
pub use logger::{ChangeLogger, LogError, LogOutcome};
pub use service::RollbackService;
pub use store::{
    JsonStateStore, MemoryRecordStore, MemoryStateStore, RecordScan, RecordStore, ScanError,
    SqliteRecordStore, StateStore, StoreDurability, StoreError,
};
