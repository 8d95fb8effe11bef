//! Accord Core - Base types, cryptography, and serialization
//!
//! This crate provides the foundational types shared by the Proof of
//! Collaboration engine: hashes, Ed25519 keys and signatures, blocks,
//! transactions, and deterministic serialization helpers.

pub mod crypto;
pub mod error;
pub mod serialize;
pub mod types;

pub use crypto::{hash_blake3, merkle_root, sign, verify, Hash, KeyPair, PublicKey, SecretKey, Sig};
pub use error::CoreError;
pub use types::*;
