//! Accord State - Keyed storage and canonical key construction
//!
//! This crate provides the ordered byte-string keyed store the consensus
//! layer persists into, and the typed builder for the canonical storage
//! keys. Key prefixes define on-disk compatibility and must not change.

pub mod error;
pub mod keys;
pub mod storage;

pub use error::StateError;
pub use keys::StoreKey;
pub use storage::{FileStorage, MemoryStorage, Storage, WriteOp};
