//! Single-owner claim on a data root.
//!
//! The owner writes its pid into `data.lock`. A host that crashes leaves the
//! file behind; the next `acquire` takes it over once the recorded pid no
//! longer exists, and operators can clear anything else with `unlock --force`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::DataRoot;

/// Contents of the lock file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub started_at_ms: u64,
    pub version: String,
}

impl LockHolder {
    fn current() -> Self {
        let started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        Self {
            pid: std::process::id(),
            started_at_ms,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Whether the process named in a lock file still runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HolderState {
    Alive,
    Gone,
    Unknown,
}

/// Signal-0 liveness check.
#[cfg(unix)]
pub fn holder_state(pid: u32) -> HolderState {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return HolderState::Unknown;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => HolderState::Alive,
        Err(Errno::ESRCH) => HolderState::Gone,
        Err(err) => {
            tracing::debug!(%err, pid, "pid check returned unexpected error");
            HolderState::Unknown
        }
    }
}

#[cfg(not(unix))]
pub fn holder_state(_pid: u32) -> HolderState {
    HolderState::Unknown
}

#[derive(Debug, Error)]
pub enum StoreLockError {
    #[error("data root is locked by {}: {path:?}", describe_holder(.holder.as_deref(), .detail.as_deref()))]
    Held {
        path: Box<PathBuf>,
        holder: Option<Box<LockHolder>>,
        /// Why the holder could not be read, when it could not.
        detail: Option<String>,
    },
    #[error("data root lock path is a symlink: {path:?}")]
    Symlink { path: PathBuf },
    #[error("lock file {path:?} does not name a holder: {source}")]
    HolderCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("io error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn describe_holder(holder: Option<&LockHolder>, detail: Option<&str>) -> String {
    match (holder, detail) {
        (Some(holder), _) => format!("pid {} (version {})", holder.pid, holder.version),
        (None, Some(detail)) => format!("an unknown process ({detail})"),
        (None, None) => "an unknown process".to_string(),
    }
}

/// Exclusive claim on a data root. Released on drop.
#[derive(Debug)]
pub struct DataRootLock {
    path: PathBuf,
    holder: LockHolder,
    released: bool,
}

impl DataRootLock {
    pub fn acquire(root: &DataRoot) -> Result<Self, StoreLockError> {
        Self::acquire_with(root, holder_state)
    }

    pub(crate) fn acquire_with(
        root: &DataRoot,
        check_pid: impl Fn(u32) -> HolderState,
    ) -> Result<Self, StoreLockError> {
        prepare_dir(root.dir())?;
        let path = root.lock_path();
        let holder = LockHolder::current();

        let file = match create_lock_file(&path)? {
            Some(file) => file,
            None => {
                let existing = read_holder(&path);
                let stale = matches!(
                    &existing,
                    Ok(other) if other.pid != holder.pid && check_pid(other.pid) == HolderState::Gone
                );
                if !stale {
                    return Err(held(path, existing));
                }
                if let Ok(other) = &existing {
                    tracing::warn!(
                        pid = other.pid,
                        path = %path.display(),
                        "taking over data root lock left by a dead process"
                    );
                }
                remove_lock_file(&path)?;
                match create_lock_file(&path)? {
                    Some(file) => file,
                    None => {
                        let racer = read_holder(&path);
                        return Err(held(path, racer));
                    }
                }
            }
        };
        write_holder(file, &path, &holder)?;

        Ok(Self {
            path,
            holder,
            released: false,
        })
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<(), StoreLockError> {
        self.released = true;
        remove_lock_file(&self.path).map(|_| ())
    }
}

impl Drop for DataRootLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.path);
        }
    }
}

/// Current holder of the root's lock, if any.
pub fn read_lock_holder(root: &DataRoot) -> Result<Option<LockHolder>, StoreLockError> {
    let path = root.lock_path();
    if !lock_file_exists(&path)? {
        return Ok(None);
    }
    read_holder(&path).map(Some)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    HolderGone,
    HolderAlive,
    HolderUnknown,
    UnreadableHolder,
}

impl UnlockReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnlockReason::HolderGone => "holder_gone",
            UnlockReason::HolderAlive => "holder_alive",
            UnlockReason::HolderUnknown => "holder_unknown",
            UnlockReason::UnreadableHolder => "unreadable_holder",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UnlockOutcome {
    NotLocked,
    Removed {
        reason: UnlockReason,
        forced: bool,
        holder: Option<LockHolder>,
    },
    /// The holder may still be running; `force` was not given.
    Refused {
        reason: UnlockReason,
        holder: Option<LockHolder>,
    },
}

/// Removes a lock whose holder is gone. Any other lock needs `force`.
pub fn unlock(root: &DataRoot, force: bool) -> Result<UnlockOutcome, StoreLockError> {
    unlock_with(root, force, holder_state)
}

pub(crate) fn unlock_with(
    root: &DataRoot,
    force: bool,
    check_pid: impl Fn(u32) -> HolderState,
) -> Result<UnlockOutcome, StoreLockError> {
    let path = root.lock_path();
    if !lock_file_exists(&path)? {
        return Ok(UnlockOutcome::NotLocked);
    }

    let (holder, reason) = match read_holder(&path) {
        Ok(holder) => {
            let reason = match check_pid(holder.pid) {
                HolderState::Gone => UnlockReason::HolderGone,
                HolderState::Alive => UnlockReason::HolderAlive,
                HolderState::Unknown => UnlockReason::HolderUnknown,
            };
            (Some(holder), reason)
        }
        Err(StoreLockError::HolderCorrupt { .. }) => (None, UnlockReason::UnreadableHolder),
        Err(err) => return Err(err),
    };

    let forced = reason != UnlockReason::HolderGone;
    if forced && !force {
        return Ok(UnlockOutcome::Refused { reason, holder });
    }

    remove_lock_file(&path)?;
    tracing::warn!(
        path = %path.display(),
        pid = holder.as_ref().map(|h| h.pid),
        forced,
        reason = reason.as_str(),
        "data root lock removed"
    );
    Ok(UnlockOutcome::Removed {
        reason,
        forced,
        holder,
    })
}

fn held(path: PathBuf, existing: Result<LockHolder, StoreLockError>) -> StoreLockError {
    let (holder, detail) = match existing {
        Ok(holder) => (Some(Box::new(holder)), None),
        Err(err) => (None, Some(err.to_string())),
    };
    StoreLockError::Held {
        path: Box::new(path),
        holder,
        detail,
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> StoreLockError + '_ {
    move |source| StoreLockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn lock_file_exists(path: &Path) -> Result<bool, StoreLockError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(StoreLockError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path)(err)),
    }
}

fn prepare_dir(dir: &Path) -> Result<(), StoreLockError> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => Err(StoreLockError::Symlink {
            path: dir.to_path_buf(),
        }),
        Ok(meta) if !meta.is_dir() => Err(io_error(dir)(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "data root is not a directory",
        ))),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(io_error(dir))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
                    .map_err(io_error(dir))?;
            }
            Ok(())
        }
        Err(err) => Err(io_error(dir)(err)),
    }
}

/// `None` when another lock file is already in place.
fn create_lock_file(path: &Path) -> Result<Option<fs::File>, StoreLockError> {
    if lock_file_exists(path)? {
        return Ok(None);
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    match options.open(path) {
        Ok(file) => Ok(Some(file)),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(err) => Err(io_error(path)(err)),
    }
}

fn read_holder(path: &Path) -> Result<LockHolder, StoreLockError> {
    let bytes = fs::read(path).map_err(io_error(path))?;
    serde_json::from_slice(&bytes).map_err(|source| StoreLockError::HolderCorrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn write_holder(mut file: fs::File, path: &Path, holder: &LockHolder) -> Result<(), StoreLockError> {
    serde_json::to_writer(&mut file, holder).map_err(|source| StoreLockError::HolderCorrupt {
        path: path.to_path_buf(),
        source,
    })?;
    file.sync_all().map_err(io_error(path))
}

/// `false` when the file was already gone.
fn remove_lock_file(path: &Path) -> Result<bool, StoreLockError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_error(path)(err)),
    }
}
