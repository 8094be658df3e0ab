//! JSON-file state side store.
//!
//! Layout: `{ "<arena>": { "<record id>": <blob>, ... }, ... }`. Every write
//! rewrites the whole document through a temp file in the same directory.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use flint_core::{ArenaId, RecordId, StateBlob};
use serde_json::{Map, Value};

use super::sqlite::reject_symlink;
use super::{StateStore, StoreError};

type Document = Map<String, Value>;

pub struct JsonStateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStateStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            reject_symlink(parent)?;
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        reject_symlink(path)?;
        let store = Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        };
        if !path.exists() {
            let _guard = store.lock()?;
            store.write_document(&Document::new())?;
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, StoreError> {
        self.write_lock.lock().map_err(|_| StoreError::Poisoned)
    }

    fn read_document(&self) -> Result<Document, StoreError> {
        reject_symlink(&self.path)?;
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Document::new());
        }
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(doc)) => Ok(doc),
            Ok(_) => Err(self.corrupt("top-level value is not an object")),
            Err(err) => Err(self.corrupt(&err.to_string())),
        }
    }

    fn write_document(&self, doc: &Document) -> Result<(), StoreError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        serde_json::to_writer(&mut temp, doc)?;
        temp.flush().map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.persist(&self.path).map_err(|err| io_err(err.error))?;
        Ok(())
    }

    fn corrupt(&self, reason: &str) -> StoreError {
        StoreError::Corrupt {
            path: self.path.clone(),
            reason: reason.to_string(),
        }
    }
}

impl StateStore for JsonStateStore {
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut doc = self.read_document()?;
        if doc.contains_key(arena.as_str()) {
            return Ok(());
        }
        doc.insert(arena.to_string(), Value::Object(Map::new()));
        self.write_document(&doc)
    }

    fn put(&self, arena: &ArenaId, id: RecordId, blob: &StateBlob) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut doc = self.read_document()?;
        let group = doc
            .entry(arena.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(group) = group else {
            return Err(self.corrupt(&format!("group for arena {arena} is not an object")));
        };
        group.insert(id.to_string(), blob.as_value().clone());
        self.write_document(&doc)
    }

    fn load_all(&self, arena: &ArenaId) -> Result<BTreeMap<RecordId, StateBlob>, StoreError> {
        let _guard = self.lock()?;
        let mut doc = self.read_document()?;
        let group = match doc.remove(arena.as_str()) {
            Some(Value::Object(group)) => group,
            Some(_) => {
                return Err(self.corrupt(&format!("group for arena {arena} is not an object")));
            }
            None => {
                return Err(StoreError::StateGroupMissing {
                    arena: arena.clone(),
                });
            }
        };

        let mut blobs = BTreeMap::new();
        for (key, value) in group {
            let Ok(id) = RecordId::parse_str(&key) else {
                tracing::warn!(%arena, key = %key, "skipping state entry with non-integer key");
                continue;
            };
            match StateBlob::try_from(value) {
                Ok(blob) => {
                    blobs.insert(id, blob);
                }
                Err(e) => {
                    tracing::warn!(%arena, record = %id, "skipping state entry: {e}");
                }
            }
        }
        Ok(blobs)
    }

    fn clear(&self, arena: &ArenaId) -> Result<(), StoreError> {
        let _guard = self.lock()?;
        let mut doc = self.read_document()?;
        if doc.remove(arena.as_str()).is_none() {
            return Ok(());
        }
        self.write_document(&doc)
    }

    fn groups(&self) -> Result<BTreeMap<ArenaId, usize>, StoreError> {
        let _guard = self.lock()?;
        let doc = self.read_document()?;
        Ok(doc
            .into_iter()
            .filter_map(|(key, value)| {
                let arena = ArenaId::new(key).ok()?;
                let len = value.as_object().map_or(0, Map::len);
                Some((arena, len))
            })
            .collect())
    }
}
