//! The privileged "surgeon" handle: block-level operations on the
//! persistent table that the scan context is allowed to invoke.

use rowcow_core::{BlockId, Result, TupleAddress};

use crate::block::BlockHandle;

/// Diagnostic facts about the table the surgeon guards, surfaced only for
/// the reconciliation failure message built in `cleanup`.
#[derive(Debug, Clone)]
pub struct TableDiagnostics {
    /// The table's name.
    pub table_name: String,
    /// The table's declared type (e.g. a schema or storage-engine label).
    pub table_type: String,
    /// Row count the table reports it had at some reference point
    /// ("original"), independent of the snapshot's own accounting.
    pub original_tuple_count: u64,
    /// Row count the table reports as currently active.
    pub active_tuple_count: u64,
    /// The partitioning column, if the table is partitioned.
    pub partition_column: Option<String>,
}

/// Operations the scan context invokes on the privileged surgeon handle.
///
/// Implementations must be safe to share across every `CowScanContext`
/// active on the same table (the engine thread serializes all calls, but
/// several contexts — see `crate::registry::ContextRegistry` — may hold a
/// reference to the same surgeon).
pub trait Surgeon: Send + Sync {
    /// Enter snapshot mode: subsequent mutations must consult the
    /// notification protocol before touching tuple storage.
    fn activate_snapshot(&self);

    /// Leave snapshot mode.
    fn deactivate_snapshot(&self);

    /// Free a pending-delete tuple's storage within `block` (cheaper than
    /// a generic lookup, since the caller already knows the block).
    fn delete_tuple_storage(&self, tuple: TupleAddress, block: &BlockHandle) -> Result<()>;

    /// Delete `address` transactionally (used by rebalancing flows that
    /// wrap the scan in a transaction).
    fn delete_tuple_for_undo(&self, address: TupleAddress, is_txnal: bool) -> Result<()>;

    /// Number of blocks currently held in the snapshot's pending list.
    fn snapshot_pending_block_count(&self) -> usize;

    /// Number of blocks currently held in the snapshot's pending *load*
    /// list (blocks not yet handed to the cursor at all).
    fn snapshot_pending_load_block_count(&self) -> usize;

    /// Snapshot of the table's block list, in scan order, as of the call.
    fn blocks(&self) -> Vec<BlockHandle>;

    /// Return `block` to the table's non-pending list; `next_block` is the
    /// block the cursor is about to move to, if any (implementations may
    /// use this to prefetch).
    fn finished_scanning_block(&self, block: BlockId, next_block: Option<BlockId>);

    /// Invariant check: do the surgeon's own block-count books balance?
    fn block_count_consistent(&self) -> bool;

    /// Diagnostic facts for the reconciliation failure message.
    fn diagnostics(&self) -> TableDiagnostics;
}
