//! SQLite-backed record log: one table per arena in a shared database file.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use flint_core::{
    ArenaId, NewRecord, RecordDecodeError, RecordId, RecordRow, RollbackRecord, SubjectKey,
};
use rusqlite::{Connection, OpenFlags, OptionalExtension, Row, params};

use super::{
    DEFAULT_SCAN_PAGE_SIZE, PageItem, PageSource, RecordScan, RecordStore, StoreDurability,
    StoreError,
};

const TABLE_PREFIX: &str = "rollback_";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const CACHE_SIZE_KB: i64 = -8_000;
const COLUMNS: &str = "id, world, x, y, z, uuid, type, data, state, record_type";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SqliteOptions {
    pub durability: StoreDurability,
    pub busy_timeout: Duration,
    pub scan_page_size: usize,
}

impl Default for SqliteOptions {
    fn default() -> Self {
        Self {
            durability: StoreDurability::Cache,
            busy_timeout: Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS),
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
        }
    }
}

pub struct SqliteRecordStore {
    db_path: PathBuf,
    conn: Mutex<Connection>,
    options: SqliteOptions,
}

impl SqliteRecordStore {
    pub fn open(db_path: &Path, options: SqliteOptions) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            reject_symlink(parent)?;
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        reject_symlink(db_path)?;

        let conn = open_connection(db_path, options)?;
        ensure_permissions(db_path)?;

        Ok(Self {
            db_path: db_path.to_path_buf(),
            conn: Mutex::new(conn),
            options,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn options(&self) -> SqliteOptions {
        self.options
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn non_negative(&self, value: i64, what: &str, table: &str) -> Result<u64, StoreError> {
        u64::try_from(value).map_err(|_| StoreError::Corrupt {
            path: self.db_path.clone(),
            reason: format!("negative {what} {value} in {table}"),
        })
    }
}

impl RecordStore for SqliteRecordStore {
    fn ensure_initialized(&self, arena: &ArenaId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let table = table_name(arena);
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table}" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                world TEXT NOT NULL,
                x REAL,
                y REAL,
                z REAL,
                uuid TEXT,
                type TEXT,
                data INTEGER NOT NULL DEFAULT 0,
                state INTEGER NOT NULL DEFAULT 0,
                record_type INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS "{table}_by_location" ON "{table}" (world, x, y, z);
            CREATE INDEX IF NOT EXISTS "{table}_by_uuid" ON "{table}" (uuid);
            "#
        ))?;
        Ok(())
    }

    fn has_log(&self, arena: &ArenaId) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        table_exists(&conn, &table_name(arena))
    }

    fn dedupe_lookup(&self, arena: &ArenaId, key: &SubjectKey) -> Result<bool, StoreError> {
        let conn = self.lock()?;
        let table = table_name(arena);
        if !table_exists(&conn, &table)? {
            return Ok(false);
        }
        let found: Option<i64> = match key {
            SubjectKey::Block { world, pos } => conn
                .prepare_cached(&format!(
                    r#"SELECT id FROM "{table}"
                       WHERE world = ?1 AND x = ?2 AND y = ?3 AND z = ?4 AND record_type = ?5
                       LIMIT 1"#
                ))?
                .query_row(
                    params![
                        world,
                        f64::from(pos.x),
                        f64::from(pos.y),
                        f64::from(pos.z),
                        flint_core::MutationKind::BlockChange.ordinal()
                    ],
                    |row| row.get(0),
                )
                .optional()?,
            SubjectKey::Entity(entity_id) => conn
                .prepare_cached(&format!(
                    r#"SELECT id FROM "{table}" WHERE uuid = ?1 LIMIT 1"#
                ))?
                .query_row(params![entity_id.to_string()], |row| row.get(0))
                .optional()?,
        };
        Ok(found.is_some())
    }

    fn append(&self, arena: &ArenaId, record: &NewRecord) -> Result<RecordId, StoreError> {
        let conn = self.lock()?;
        let table = table_name(arena);
        if !table_exists(&conn, &table)? {
            return Err(StoreError::NoSuchLog {
                arena: arena.clone(),
            });
        }
        let row = record.to_row();
        conn.prepare_cached(&format!(
            r#"INSERT INTO "{table}" (world, x, y, z, uuid, type, data, state, record_type)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"#
        ))?
        .execute(params![
            row.world,
            row.x,
            row.y,
            row.z,
            row.uuid,
            row.type_tag,
            row.data,
            row.state,
            row.record_type
        ])?;
        let id = conn.last_insert_rowid();
        self.non_negative(id, "rowid", &table).map(RecordId::new)
    }

    fn scan_all(&self, arena: &ArenaId) -> Result<RecordScan<'_>, StoreError> {
        if !self.has_log(arena)? {
            return Err(StoreError::NoSuchLog {
                arena: arena.clone(),
            });
        }
        let source = SqlitePages {
            conn: &self.conn,
            table: table_name(arena),
        };
        Ok(RecordScan::new(Box::new(source), self.options.scan_page_size))
    }

    fn drop_log(&self, arena: &ArenaId) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute_batch(&format!(r#"DROP TABLE IF EXISTS "{}""#, table_name(arena)))?;
        Ok(())
    }

    fn active_logs(&self) -> Result<Vec<ArenaId>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'rollback\\_%' ESCAPE '\\' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names
            .iter()
            .filter_map(|name| name.strip_prefix(TABLE_PREFIX))
            .filter_map(|raw| ArenaId::new(raw).ok())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect())
    }

    fn count(&self, arena: &ArenaId) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let table = table_name(arena);
        if !table_exists(&conn, &table)? {
            return Err(StoreError::NoSuchLog {
                arena: arena.clone(),
            });
        }
        let count: i64 =
            conn.query_row(&format!(r#"SELECT COUNT(*) FROM "{table}""#), [], |row| {
                row.get(0)
            })?;
        self.non_negative(count, "row count", &table)
    }
}

struct SqlitePages<'a> {
    conn: &'a Mutex<Connection>,
    table: String,
}

impl PageSource for SqlitePages<'_> {
    fn fetch(&mut self, after: Option<RecordId>, limit: usize) -> Result<Vec<PageItem>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let after = after.map_or(i64::MIN, |id| i64::try_from(id.get()).unwrap_or(i64::MAX));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare_cached(&format!(
            r#"SELECT {COLUMNS} FROM "{}" WHERE id > ?1 ORDER BY id LIMIT ?2"#,
            self.table
        ))?;
        let items = stmt
            .query_map(params![after, limit], decode_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }
}

/// Only the id column is load-bearing for the scan itself; any other bad
/// column marks just this row as corrupt.
fn decode_row(row: &Row<'_>) -> rusqlite::Result<PageItem> {
    let raw_id: i64 = row.get(0)?;
    let id = RecordId::new(u64::try_from(raw_id).unwrap_or(0));
    if raw_id <= 0 {
        return Ok(Err(RecordDecodeError {
            id,
            reason: format!("non-positive id {raw_id}"),
        }));
    }
    match read_columns(row) {
        Ok(columns) => Ok(RollbackRecord::from_row(id, columns)),
        Err(err) => Ok(Err(RecordDecodeError {
            id,
            reason: err.to_string(),
        })),
    }
}

fn read_columns(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        world: row.get(1)?,
        x: row.get(2)?,
        y: row.get(3)?,
        z: row.get(4)?,
        uuid: row.get(5)?,
        type_tag: row.get(6)?,
        data: row.get(7)?,
        state: row.get(8)?,
        record_type: row.get(9)?,
    })
}

fn table_name(arena: &ArenaId) -> String {
    format!("{TABLE_PREFIX}{}", arena.as_str())
}

fn table_exists(conn: &Connection, name: &str) -> Result<bool, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn ensure_permissions(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(
            |source| StoreError::Io {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }
    Ok(())
}

pub(crate) fn reject_symlink(path: &Path) -> Result<(), StoreError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(StoreError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source: err,
        }),
    }
}

fn open_connection(path: &Path, options: SqliteOptions) -> Result<Connection, StoreError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", options.durability.synchronous_value())?;
    conn.pragma_update(None, "cache_size", CACHE_SIZE_KB)?;
    conn.busy_timeout(options.busy_timeout)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[cfg(unix)]
    use std::os::unix::fs::symlink;

    use flint_core::{
        BlockPos, BlockSubject, EntityChangeSubject, EntityId, MutationKind, RecordSubject,
    };
    use tempfile::TempDir;
    use uuid::Uuid;

    fn arena(name: &str) -> ArenaId {
        ArenaId::new(name).unwrap()
    }

    fn open(temp: &TempDir) -> SqliteRecordStore {
        SqliteRecordStore::open(&temp.path().join("rollback.sqlite"), SqliteOptions::default())
            .unwrap()
    }

    fn block(x: i32, type_tag: &str) -> NewRecord {
        NewRecord {
            world: "w".into(),
            has_state: false,
            subject: RecordSubject::Block(BlockSubject {
                pos: BlockPos::new(x, 64, 0),
                type_tag: type_tag.into(),
                aux_data: 1,
            }),
        }
    }

    fn index_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name = ?1",
            params![name],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    #[test]
    fn ensure_initialized_creates_table_and_indexes_idempotently() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let a = arena("arena1");
        assert!(!store.has_log(&a).unwrap());
        store.ensure_initialized(&a).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        store.ensure_initialized(&a).unwrap();
        assert_eq!(store.count(&a).unwrap(), 1);

        let conn = store.lock().unwrap();
        assert!(table_exists(&conn, "rollback_arena1").unwrap());
        assert!(index_exists(&conn, "rollback_arena1_by_location"));
        assert!(index_exists(&conn, "rollback_arena1_by_uuid"));
    }

    #[test]
    fn dedupe_lookup_uses_block_and_entity_keys() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let a = arena("arena1");
        let entity = EntityId::new(Uuid::from_u128(42));
        let key = SubjectKey::Block {
            world: "w".into(),
            pos: BlockPos::new(1, 64, 0),
        };
        assert!(!store.dedupe_lookup(&a, &key).unwrap());

        store.ensure_initialized(&a).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        store
            .append(
                &a,
                &NewRecord {
                    world: "w".into(),
                    has_state: true,
                    subject: RecordSubject::EntityChange(EntityChangeSubject {
                        entity_id: entity,
                        position: (2.0, 64.0, 0.0),
                        type_tag: "cow".into(),
                    }),
                },
            )
            .unwrap();

        assert!(store.dedupe_lookup(&a, &key).unwrap());
        assert!(store.dedupe_lookup(&a, &SubjectKey::Entity(entity)).unwrap());
        let elsewhere = SubjectKey::Block {
            world: "other".into(),
            pos: BlockPos::new(1, 64, 0),
        };
        assert!(!store.dedupe_lookup(&a, &elsewhere).unwrap());
        // An entity standing on a block position is not a block record.
        let under_entity = SubjectKey::Block {
            world: "w".into(),
            pos: BlockPos::new(2, 64, 0),
        };
        assert!(!store.dedupe_lookup(&a, &under_entity).unwrap());
    }

    #[test]
    fn scan_returns_insertion_order_across_pages() {
        let temp = TempDir::new().unwrap();
        let options = SqliteOptions {
            scan_page_size: 2,
            ..SqliteOptions::default()
        };
        let store =
            SqliteRecordStore::open(&temp.path().join("rollback.sqlite"), options).unwrap();
        let a = arena("arena1");
        store.ensure_initialized(&a).unwrap();
        for x in 0..5 {
            store.append(&a, &block(x, "stone")).unwrap();
        }
        let records: Vec<_> = store
            .scan_all(&a)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        let ids: Vec<u64> = records.iter().map(|r| r.id().get()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert!(records.iter().all(|r| r.kind() == MutationKind::BlockChange));
    }

    #[test]
    fn corrupt_row_is_reported_and_scan_continues() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let a = arena("arena1");
        store.ensure_initialized(&a).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        store.append(&a, &block(2, "dirt")).unwrap();
        store
            .lock()
            .unwrap()
            .execute("UPDATE rollback_arena1 SET type = NULL WHERE id = 1", [])
            .unwrap();

        let items: Vec<_> = store.scan_all(&a).unwrap().collect();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(crate::store::ScanError::Corrupt(_))));
        assert!(items[1].is_ok());
    }

    #[test]
    fn drop_log_is_idempotent_and_resets_ids() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let a = arena("arena1");
        store.drop_log(&a).unwrap();
        store.ensure_initialized(&a).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        store.drop_log(&a).unwrap();
        store.drop_log(&a).unwrap();
        assert!(!store.has_log(&a).unwrap());
        assert!(matches!(
            store.scan_all(&a),
            Err(StoreError::NoSuchLog { .. })
        ));
        assert!(matches!(
            store.append(&a, &block(1, "stone")),
            Err(StoreError::NoSuchLog { .. })
        ));
    }

    #[test]
    fn arenas_do_not_share_tables() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let (a, b) = (arena("a"), arena("b"));
        store.ensure_initialized(&a).unwrap();
        store.ensure_initialized(&b).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        assert_eq!(store.count(&b).unwrap(), 0);
        assert_eq!(store.active_logs().unwrap(), vec![a.clone(), b.clone()]);
        store.drop_log(&a).unwrap();
        assert_eq!(store.active_logs().unwrap(), vec![b]);
    }

    #[test]
    fn durable_mode_sets_synchronous_full() {
        let temp = TempDir::new().unwrap();
        let options = SqliteOptions {
            durability: StoreDurability::Durable,
            ..SqliteOptions::default()
        };
        let store =
            SqliteRecordStore::open(&temp.path().join("rollback.sqlite"), options).unwrap();
        let sync: i64 = store
            .lock()
            .unwrap()
            .query_row("PRAGMA synchronous", [], |row| row.get(0))
            .unwrap();
        assert_eq!(sync, 2);
    }

    #[cfg(unix)]
    #[test]
    fn rejects_symlinked_db_path() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("elsewhere.sqlite");
        std::fs::write(&target, b"").unwrap();
        let link = temp.path().join("rollback.sqlite");
        symlink(&target, &link).unwrap();
        let result = SqliteRecordStore::open(&link, SqliteOptions::default());
        assert!(matches!(result, Err(StoreError::Symlink { .. })));
    }

    #[test]
    fn negative_sqlite_integers_are_reported_as_corruption() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        assert_eq!(store.non_negative(3, "row count", "rollback_a").unwrap(), 3);
        match store.non_negative(-1, "row count", "rollback_a") {
            Err(StoreError::Corrupt { reason, .. }) => {
                assert!(reason.contains("negative row count -1"), "{reason}");
            }
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }

    #[test]
    fn table_lookup_ignores_identifier_case() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store
            .lock()
            .unwrap()
            .execute_batch(
                r#"CREATE TABLE "rollback_Arena1" (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    world TEXT NOT NULL,
                    x REAL, y REAL, z REAL,
                    uuid TEXT, type TEXT,
                    data INTEGER NOT NULL DEFAULT 0,
                    state INTEGER NOT NULL DEFAULT 0,
                    record_type INTEGER NOT NULL
                );"#,
            )
            .unwrap();

        let a = arena("ARENA1");
        assert!(store.has_log(&a).unwrap());
        store.ensure_initialized(&a).unwrap();
        store.append(&a, &block(1, "stone")).unwrap();
        assert_eq!(store.count(&arena("arena1")).unwrap(), 1);
        assert_eq!(store.active_logs().unwrap(), vec![arena("arena1")]);

        store.drop_log(&a).unwrap();
        assert!(!store.has_log(&arena("Arena1")).unwrap());
    }
}
