pub mod file;
pub mod memory;

use crate::error::StateError;
use crate::keys::StoreKey;

/// A single operation inside an atomic batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Del { key: Vec<u8> },
}

impl WriteOp {
    pub fn put(key: StoreKey, value: Vec<u8>) -> Self {
        WriteOp::Put {
            key: key.into_bytes(),
            value,
        }
    }

    pub fn del(key: StoreKey) -> Self {
        WriteOp::Del {
            key: key.into_bytes(),
        }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            WriteOp::Put { key, .. } => key,
            WriteOp::Del { key } => key,
        }
    }
}

/// Ordered byte-string keyed store. Batches are applied atomically: after a
/// successful `write_batch` every op is visible, after a failed one none is.
pub trait Storage: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// Apply a batch of writes atomically
    fn write_batch(&mut self, ops: Vec<WriteOp>) -> Result<(), StateError>;

    /// Get all keys with a given prefix, in ascending byte order
    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Put a single key-value pair
    fn put(&mut self, key: StoreKey, value: Vec<u8>) -> Result<(), StateError> {
        self.write_batch(vec![WriteOp::put(key, value)])
    }

    /// Delete a single key
    fn delete(&mut self, key: StoreKey) -> Result<(), StateError> {
        self.write_batch(vec![WriteOp::del(key)])
    }
}

pub use file::FileStorage;
pub use memory::MemoryStorage;
