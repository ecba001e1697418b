//! Local directory storage backend

use crate::storage::traits::{file_index, validate_id, Storage, StorageResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Stores every file under a root directory
///
/// The root directory (and any sub directory named in a file id) is
/// created on first write.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root_dir: PathBuf,
}

impl FileSystemStorage {
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn path_for(&self, id: &str) -> StorageResult<PathBuf> {
        validate_id(id)?;
        Ok(self.root_dir.join(id))
    }
}

impl Storage for FileSystemStorage {
    fn write(&self, id: &str, data: &[u8]) -> StorageResult<()> {
        let path = self.path_for(id)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)?;
        Ok(())
    }

    fn read(&self, id: &str) -> StorageResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(id)?) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, id: &str) -> StorageResult<bool> {
        Ok(self.path_for(id)?.is_file())
    }

    fn max_file_idx(&self) -> StorageResult<usize> {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut max_idx = 0;
        for entry in entries {
            let entry = entry?;
            if let Some(idx) = entry.file_name().to_str().and_then(file_index) {
                max_idx = max_idx.max(idx);
            }
        }
        Ok(max_idx)
    }

    fn count(&self) -> StorageResult<u64> {
        let entries = match fs::read_dir(&self.root_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut count = 0;
        for entry in entries {
            if entry?.file_type()?.is_file() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn describe(&self) -> String {
        format!("filesystem:{}", self.root_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_creates_root_dir() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path().join("images"));

        storage.write("000001.jpg", b"jpeg bytes").unwrap();

        assert!(storage.exists("000001.jpg").unwrap());
        assert_eq!(
            storage.read("000001.jpg").unwrap(),
            Some(b"jpeg bytes".to_vec())
        );
        assert_eq!(storage.count().unwrap(), 1);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path().join("nothing-here"));

        assert_eq!(storage.max_file_idx().unwrap(), 0);
        assert_eq!(storage.count().unwrap(), 0);
        assert!(!storage.exists("000001.jpg").unwrap());
        assert_eq!(storage.read("000001.jpg").unwrap(), None);
    }

    #[test]
    fn test_max_file_idx_ignores_non_numeric_names() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path());

        storage.write("000003.png", b"a").unwrap();
        storage.write("000017.gif", b"b").unwrap();
        storage.write("notes.txt", b"c").unwrap();

        assert_eq!(storage.max_file_idx().unwrap(), 17);
    }

    #[test]
    fn test_rejects_escaping_ids() {
        let dir = TempDir::new().unwrap();
        let storage = FileSystemStorage::new(dir.path());
        assert!(storage.write("../escape.jpg", b"x").is_err());
    }
}
