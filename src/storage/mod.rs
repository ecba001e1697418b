//! Storage backends for downloaded files
//!
//! This module provides:
//! - the [`Storage`] trait the downloader writes through
//! - a local directory backend
//! - a SQLite backend that keeps files as blobs

mod filesystem;
mod schema;
mod sqlite;
mod traits;

pub use filesystem::FileSystemStorage;
pub use sqlite::SqliteStorage;
pub use traits::{file_index, Storage, StorageError, StorageResult};

use crate::config::StorageConfig;
use std::sync::Arc;

/// Opens the storage backend selected in the configuration
pub fn open_storage(config: &StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    let storage: Arc<dyn Storage> = match config {
        StorageConfig::FileSystem { root_dir } => Arc::new(FileSystemStorage::new(root_dir)),
        StorageConfig::Sqlite { path } => Arc::new(SqliteStorage::new(path)?),
    };
    tracing::info!("Using storage backend {}", storage.describe());
    Ok(storage)
}
