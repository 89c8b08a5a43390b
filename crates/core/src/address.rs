//! Stable addressing of tuples within the persistent table's block list.

use std::fmt;

/// Identifies a block for the lifetime of that block.
///
/// Compaction can retire a `BlockId` entirely (the block ceases to exist)
/// but never reassigns an address to a different block while it is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block#{}", self.0)
    }
}

/// Position of a tuple slot within a block's dense slot array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotIndex(pub u32);

impl fmt::Display for SlotIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// A tuple's address: the block it lives in plus its slot within that block.
///
/// Compaction changes a tuple's `TupleAddress` (it may move to a different
/// block and/or slot) while preserving the tuple's identity; callers that
/// need to track "the same logical row" across a compaction must do so by
/// some means other than comparing addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TupleAddress {
    /// Block containing the tuple.
    pub block: BlockId,
    /// Slot within the block.
    pub slot: SlotIndex,
}

impl TupleAddress {
    /// Construct an address from a block id and slot index.
    pub fn new(block: BlockId, slot: SlotIndex) -> Self {
        Self { block, slot }
    }
}

impl fmt::Display for TupleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.block, self.slot)
    }
}
