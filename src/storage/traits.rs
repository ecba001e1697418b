//! Storage traits and error types
//!
//! The downloader persists every fetched file through a [`Storage`]
//! backend. Backends are shared by all downloader threads, so every method
//! takes `&self` and implementations synchronize internally.

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid file id: {0}")]
    InvalidId(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
pub trait Storage: Send + Sync {
    /// Writes (or overwrites) the file `id`
    fn write(&self, id: &str, data: &[u8]) -> StorageResult<()>;

    /// Reads the file `id`, if present
    fn read(&self, id: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Checks whether the file `id` exists
    fn exists(&self, id: &str) -> StorageResult<bool>;

    /// Largest numeric file index currently stored, 0 when there is none
    ///
    /// A file's index is the integer value of its name without extension,
    /// so `000042.jpg` has index 42. Names that are not numbers are
    /// ignored.
    fn max_file_idx(&self) -> StorageResult<usize>;

    /// Number of stored files
    fn count(&self) -> StorageResult<u64>;

    /// Short human-readable description used in logs
    fn describe(&self) -> String;
}

/// Parses the numeric index out of a file id such as `sub/000042.jpg`
pub fn file_index(id: &str) -> Option<usize> {
    let name = id.rsplit('/').next()?;
    let stem = match name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => name,
    };
    stem.parse().ok()
}

/// Rejects ids that would escape the storage root
pub(crate) fn validate_id(id: &str) -> StorageResult<()> {
    if id.is_empty()
        || id.starts_with('/')
        || id.contains('\\')
        || id.split('/').any(|part| part.is_empty() || part == "..")
    {
        return Err(StorageError::InvalidId(id.to_string()));
    }
    Ok(())
}
