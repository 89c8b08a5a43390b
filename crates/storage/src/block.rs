//! The block-list abstraction the live cursor scans, and the slots within
//! a block.
//!
//! `Block` and `Surgeon` (in `crate::surgeon`) are the interfaces the
//! persistent table and its privileged accessor implement; the scan
//! context only ever talks to the table through them. `crate::reftable`
//! supplies the one concrete implementation this crate ships, used by its
//! own test suite.

use std::fmt;
use std::sync::Arc;

use rowcow_core::{BlockId, Tuple};

/// What a slot in a block currently holds.
#[derive(Debug, Clone)]
pub enum SlotState {
    /// The slot holds no live tuple (freed, or never occupied).
    Empty,
    /// The slot holds a live tuple.
    Occupied(Tuple),
}

/// A fixed-size container of tuple slots, addressed by stable `BlockId`
/// for the block's lifetime.
///
/// Implementations must allow `set_dirty` to be called concurrently with
/// reads of other slots — the scan context only ever touches one slot at a
/// time, but the block is shared with the rest of the engine.
pub trait Block: fmt::Debug + Send + Sync {
    /// This block's stable address.
    fn id(&self) -> BlockId;

    /// Number of slots in the block's dense array.
    fn slot_count(&self) -> usize;

    /// Read the slot at `idx`.
    fn slot(&self, idx: usize) -> SlotState;

    /// Set (or clear) the dirty bit on the tuple at `idx`.
    ///
    /// No-op if the slot is empty (the tuple may have been concurrently
    /// freed; the caller's own address check against the table is
    /// authoritative, not this method).
    fn set_dirty(&self, idx: usize, dirty: bool);
}

/// A block as seen by the live cursor: shared, type-erased.
pub type BlockHandle = Arc<dyn Block>;
