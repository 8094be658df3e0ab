//! XDG directory helpers for config/data locations.

use std::cell::RefCell;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "flint-rollback";

/// Base directory for the rollback stores.
///
/// Resolution order: thread-local override, `FLINT_DATA_DIR`, the
/// configured `paths.data_dir`, then `$XDG_DATA_HOME/flint-rollback` or
/// `~/.local/share/flint-rollback`.
pub fn data_dir(configured: Option<&Path>) -> PathBuf {
    if let Some(dir) = thread_local_data_dir_override() {
        return dir;
    }

    if let Ok(dir) = std::env::var("FLINT_DATA_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    if let Some(dir) = configured {
        return dir.to_path_buf();
    }

    std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join(APP_DIR)
}

/// Base directory for configuration files.
///
/// Uses `FLINT_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/flint-rollback`
/// or `~/.config/flint-rollback`.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FLINT_CONFIG_DIR")
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }

    std::env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".config")
        })
        .join(APP_DIR)
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default directory for rolling log files.
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// The files making up one data root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataRoot {
    dir: PathBuf,
}

impl DataRoot {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn records_path(&self) -> PathBuf {
        self.dir.join("rollback.sqlite")
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join("rollback_state.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.join("data.lock")
    }
}

#[doc(hidden)]
pub struct DataDirOverride {
    prev: Option<PathBuf>,
}

impl DataDirOverride {
    pub fn new(path: Option<PathBuf>) -> Self {
        let prev = TEST_DATA_DIR_OVERRIDE.with(|cell| cell.replace(path));
        Self { prev }
    }
}

impl Drop for DataDirOverride {
    fn drop(&mut self) {
        let prev = self.prev.take();
        TEST_DATA_DIR_OVERRIDE.with(|cell| {
            cell.replace(prev);
        });
    }
}

#[doc(hidden)]
pub fn override_data_dir_for_tests(path: Option<PathBuf>) -> DataDirOverride {
    DataDirOverride::new(path)
}

fn thread_local_data_dir_override() -> Option<PathBuf> {
    TEST_DATA_DIR_OVERRIDE.with(|cell| cell.borrow().clone())
}

thread_local! {
    static TEST_DATA_DIR_OVERRIDE: RefCell<Option<PathBuf>> = const { RefCell::new(None) };
}
