//! Tuple payloads and the per-tuple flags the COW context inspects.

use smallvec::SmallVec;

use crate::address::TupleAddress;

/// The three flags the scan protocol attaches to every tuple in the
/// persistent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TupleFlags {
    /// Mutated since activation; the live cursor must not emit this tuple.
    pub dirty: bool,
    /// Logically deleted but physical free deferred until the snapshot
    /// cursor passes this slot.
    pub pending_delete: bool,
    /// Pending-delete that originated from a transactional undo rather
    /// than the snapshot's own bookkeeping; `cleanup_tuple` frees these
    /// via the undo path instead of `delete_tuple_storage`.
    pub pending_delete_on_undo_release: bool,
}

/// A tuple as read by the scan context: its address, flags, and payload.
///
/// `payload` uses `SmallVec` so that small fixed-width rows (the common
/// case) avoid a heap allocation per read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    /// Address of this tuple at the moment it was read.
    pub address: TupleAddress,
    /// Dirty / pending-delete bits.
    pub flags: TupleFlags,
    /// Row payload, opaque to the scan context.
    pub payload: SmallVec<[u8; 32]>,
}

impl Tuple {
    /// Construct a tuple from its address, flags and payload bytes.
    pub fn new(address: TupleAddress, flags: TupleFlags, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            flags,
            payload: SmallVec::from_vec(payload.into()),
        }
    }

    /// True if either pending-delete flag is set.
    pub fn is_pending_delete(&self) -> bool {
        self.flags.pending_delete || self.flags.pending_delete_on_undo_release
    }
}
