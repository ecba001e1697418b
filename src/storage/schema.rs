//! Database schema for the SQLite storage backend

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Downloaded files, keyed by their generated file name
CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    size INTEGER NOT NULL,
    written_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_files_written_at ON files(written_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
