use thiserror::Error;

pub use flint_core::{Effect, Transience};

use crate::config::ConfigError;
use crate::engine::RollbackError;
use crate::logger::LogError;
use crate::store::StoreError;
use crate::store_lock::StoreLockError;
use flint_core::CoreError;

/// Crate-level convenience error.
///
/// A thin wrapper over the capability errors; match on the inner error
/// when the distinction matters.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    Lock(#[from] StoreLockError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn transience(&self) -> Transience {
        match self {
            Error::Core(e) => e.transience(),
            Error::Store(e) => e.transience(),
            Error::Log(e) => e.transience(),
            Error::Rollback(e) => e.transience(),
            Error::Lock(StoreLockError::Held { .. }) => Transience::Retryable,
            Error::Lock(_) => Transience::Unknown,
            Error::Config(_) => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            Error::Core(e) => e.effect(),
            Error::Store(e) => e.effect(),
            Error::Log(e) => e.effect(),
            Error::Rollback(e) => e.effect(),
            Error::Lock(_) | Error::Config(_) => Effect::None,
        }
    }
}
