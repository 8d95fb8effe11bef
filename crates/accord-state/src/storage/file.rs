use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use accord_core::serialize;
use tracing::debug;

use super::{Storage, WriteOp};
use crate::error::StateError;

/// File-backed storage using a single snapshot file. Batches mutate the
/// in-memory map first and flush through a temp-file rename, so a crash
/// mid-flush leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl FileStorage {
    pub fn new<P: Into<PathBuf>>(path: P) -> Result<Self, StateError> {
        let path = path.into();
        let data = if path.exists() {
            let bytes = fs::read(&path).map_err(|e| StateError::Storage(e.to_string()))?;
            if bytes.is_empty() {
                BTreeMap::new()
            } else {
                serialize::from_bytes(&bytes)
                    .map_err(|e| StateError::Serialization(e.to_string()))?
            }
        } else {
            BTreeMap::new()
        };

        debug!("Opened file storage at {:?} with {} keys", path, data.len());

        Ok(FileStorage { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush_to_disk(&self) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| StateError::Storage(e.to_string()))?;
        }

        let bytes =
            serialize::to_bytes(&self.data).map_err(|e| StateError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        fs::write(&tmp_path, &bytes).map_err(|e| StateError::Storage(e.to_string()))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| StateError::Storage(e.to_string()))?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), StateError> {
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    self.data.insert(key, value);
                }
                WriteOp::Del { key } => {
                    self.data.remove(&key);
                }
            }
        }
        self.flush_to_disk()
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::StoreKey;

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.bin");

        {
            let mut storage = FileStorage::new(&path).unwrap();
            storage
                .put(StoreKey::meta_block_count(), 42u64.to_le_bytes().to_vec())
                .unwrap();
        }

        let reopened = FileStorage::new(&path).unwrap();
        assert_eq!(
            reopened.get(StoreKey::meta_block_count().as_bytes()),
            Some(42u64.to_le_bytes().to_vec())
        );
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        fs::write(&path, b"").unwrap();

        let storage = FileStorage::new(&path).unwrap();
        assert!(storage.keys_with_prefix(b"").is_empty());
    }

    #[test]
    fn test_batch_flushes_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.bin");

        let mut storage = FileStorage::new(&path).unwrap();
        storage
            .write_batch(vec![
                WriteOp::put(StoreKey::meta_tip(), b"tip".to_vec()),
                WriteOp::del(StoreKey::meta_block_count()),
            ])
            .unwrap();

        assert!(path.exists());
        let reopened = FileStorage::new(&path).unwrap();
        assert_eq!(
            reopened.get(StoreKey::meta_tip().as_bytes()),
            Some(b"tip".to_vec())
        );
    }
}
