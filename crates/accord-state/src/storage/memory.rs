use std::collections::BTreeMap;

use super::{Storage, WriteOp};
use crate::error::StateError;

/// In-memory storage implementation using BTreeMap
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            data: BTreeMap::new(),
        }
    }

    /// Get the number of stored keys
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Full contents, for assertions on state equality in tests
    pub fn all_data(&self) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        &self.data
    }
}

impl Storage for MemoryStorage {
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
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &[u8]) -> Vec<Vec<u8>> {
        self.data
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}
