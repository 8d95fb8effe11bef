//! Accord Sync - Block transport and chain synchronization
//!
//! Consumes blocks from a pluggable, at-least-once transport and applies
//! them to chain state exactly once. Every mutation an applied block makes
//! is journaled with its pre-image so a partially applied or forked block
//! can be rolled back, and restart recovery unwinds partial applies before
//! catching up from peers.

pub mod error;
pub mod synchronizer;
pub mod transport;

pub use error::SyncError;
pub use synchronizer::{
    ApplyOutcome, BlockSynchronizer, ChainTip, RecoveryReport, SyncConfig, UndoRecord,
};
pub use transport::{
    BlockEnvelope, BlockTransport, InMemoryTransport, PeerBlockSource, MAX_INVENTORY_PER_REQUEST,
};
