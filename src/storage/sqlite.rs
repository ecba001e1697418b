//! SQLite storage backend
//!
//! Files are stored as blobs in a single table, which keeps a whole crawl
//! in one portable database file.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{file_index, validate_id, Storage, StorageError, StorageResult};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Mutex<Connection>,
    label: String,
}

impl SqliteStorage {
    /// Opens (or creates) the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            label: format!("sqlite:{}", path.display()),
        })
    }

    /// Creates an in-memory database
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            label: "sqlite::memory:".to_string(),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

impl Storage for SqliteStorage {
    fn write(&self, id: &str, data: &[u8]) -> StorageResult<()> {
        validate_id(id)?;
        let now = Utc::now().to_rfc3339();
        self.conn()?.execute(
            "INSERT OR REPLACE INTO files (id, data, size, written_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, data, data.len() as i64, now],
        )?;
        Ok(())
    }

    fn read(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        let data = self
            .conn()?
            .query_row("SELECT data FROM files WHERE id = ?1", params![id], |row| {
                row.get::<_, Vec<u8>>(0)
            })
            .optional()?;
        Ok(data)
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        let found = self
            .conn()?
            .query_row("SELECT 1 FROM files WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    fn max_file_idx(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id FROM files")?;
        let ids = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut max_idx = 0;
        for id in ids {
            if let Some(idx) = file_index(&id?) {
                max_idx = max_idx.max(idx);
            }
        }
        Ok(max_idx)
    }

    fn count(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn()?
            .query_row("SELECT COUNT(*) FROM files", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
