//! Accord Mempool - Pending transaction pool
//!
//! Transactions wait here between submission and block inclusion. Batches
//! handed to the proposer come out in arrival order (timestamp, then salt);
//! any other ordering in a proposed block is a fraud candidate.

pub mod pool;

pub use pool::{Mempool, MempoolConfig, MempoolError, PendingTransaction};
