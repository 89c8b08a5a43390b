//! Error types.
//!
//! Most of the COW scan context's own operations report outcomes as
//! `bool`/`Option` rather than `Result` — only the reference table/surgeon
//! (the crate's own test harness, see `rowcow_storage::reftable`) needs a
//! recoverable error type for things like allocation failure or an
//! out-of-range address.

use thiserror::Error;

/// Result type alias used by the reference table and pool allocator.
pub type Result<T> = std::result::Result<T, Error>;

/// Recoverable error conditions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// The address does not name a live tuple.
    #[error("no live tuple at address {0}")]
    NoSuchTuple(crate::address::TupleAddress),

    /// The block does not exist (already compacted away or never allocated).
    #[error("no such block: {0}")]
    NoSuchBlock(crate::address::BlockId),

    /// Scratch pool exhausted during a deep-copy allocation.
    #[error("pre-image allocation failed: pool exhausted after {0} bytes")]
    PoolExhausted(usize),

    /// Attempted to free storage that was already freed.
    #[error("double free at address {0}")]
    DoubleFree(crate::address::TupleAddress),
}
