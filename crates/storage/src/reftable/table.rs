//! The reference table itself: block allocation, the `Surgeon`
//! implementation, and the public insert/update/delete/compact API tests
//! drive to exercise `CowScanContext` end to end.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use rowcow_core::{BlockId, Error, Result, SlotIndex, Tuple, TupleAddress, TupleFlags};

use crate::block::BlockHandle;
use crate::context::{CowScanConfig, CowScanContext, DirtyDecision, UNTRACKED};
use crate::registry::{ContextHandle, ContextRegistry};
use crate::reftable::block::ReferenceBlock;
use crate::surgeon::{Surgeon, TableDiagnostics};

/// A block-allocated in-memory table, with one privileged
/// `ContextRegistry` of active snapshot scans.
pub struct ReferenceTable {
    name: String,
    table_type: String,
    partition_column: Option<String>,
    block_capacity: usize,

    blocks: Mutex<Vec<Arc<ReferenceBlock>>>,
    next_block_id: AtomicU64,
    snapshot_active: Mutex<bool>,
    original_tuple_count: AtomicU64,
    active_tuple_count: AtomicU64,

    contexts: ContextRegistry,
    /// Self-reference so `begin_snapshot` can hand out an `Arc<dyn
    /// Surgeon>` from `&self` without requiring an `Arc<Self>` receiver
    /// (not supported on stable Rust for a non-`Self` wrapper type).
    self_ref: Weak<ReferenceTable>,
}

impl ReferenceTable {
    /// Create an empty table with the given name, type label and block
    /// size. `partition_column` is purely a diagnostic field, surfaced in
    /// reconciliation failure messages.
    pub fn new(
        name: impl Into<String>,
        table_type: impl Into<String>,
        partition_column: Option<String>,
        block_capacity: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            name: name.into(),
            table_type: table_type.into(),
            partition_column,
            block_capacity,
            blocks: Mutex::new(Vec::new()),
            next_block_id: AtomicU64::new(0),
            snapshot_active: Mutex::new(false),
            original_tuple_count: AtomicU64::new(0),
            active_tuple_count: AtomicU64::new(0),
            contexts: ContextRegistry::new(),
            self_ref: self_ref.clone(),
        })
    }

    fn find_block(&self, id: BlockId) -> Option<Arc<ReferenceBlock>> {
        self.blocks.lock().unwrap().iter().find(|b| b.id() == id).cloned()
    }

    fn allocate_slot(&self) -> (Arc<ReferenceBlock>, usize) {
        let mut blocks = self.blocks.lock().unwrap();
        for block in blocks.iter() {
            if let Some(idx) = block.first_empty_slot() {
                return (Arc::clone(block), idx);
            }
        }
        let id = BlockId(self.next_block_id.fetch_add(1, Ordering::Relaxed));
        let block = Arc::new(ReferenceBlock::new(id, self.block_capacity));
        blocks.push(Arc::clone(&block));
        (block, 0)
    }

    /// Insert a new tuple, returning its address. Dispatches
    /// `on_tuple_insert` before the row becomes visible.
    pub fn insert(&self, payload: impl Into<Vec<u8>>) -> TupleAddress {
        let (block, idx) = self.allocate_slot();
        let address = TupleAddress::new(block.id(), SlotIndex(idx as u32));
        let preview = Tuple::new(address, TupleFlags::default(), payload);

        let decision = self.contexts.dispatch_insert(&preview);
        let mut tuple = preview;
        apply_decision(&mut tuple.flags, decision);

        block.occupy(idx, tuple);
        self.active_tuple_count.fetch_add(1, Ordering::Relaxed);
        address
    }

    /// Overwrite the tuple at `address` with `payload` in place.
    /// Dispatches `on_tuple_update` with the pre-mutation tuple.
    pub fn update(&self, address: TupleAddress, payload: impl Into<Vec<u8>>) -> Result<()> {
        let block = self.find_block(address.block).ok_or(Error::NoSuchBlock(address.block))?;
        let idx = address.slot.0 as usize;
        let old = block.read(idx).ok_or(Error::NoSuchTuple(address))?;

        let decision = self.contexts.dispatch_update(&old);
        let mut flags = old.flags;
        apply_decision(&mut flags, decision);

        block.write(idx, Tuple::new(address, flags, payload));
        Ok(())
    }

    /// Logically delete the tuple at `address`. If every active context
    /// agrees the cursor has already passed it, the slot is freed
    /// immediately; otherwise it is marked pending-delete and left in
    /// place for `CowScanContext::cleanup_tuple` to free later.
    pub fn delete(&self, address: TupleAddress) -> Result<()> {
        let block = self.find_block(address.block).ok_or(Error::NoSuchBlock(address.block))?;
        let idx = address.slot.0 as usize;
        let tuple = block.read(idx).ok_or(Error::NoSuchTuple(address))?;

        let allowed = self.contexts.dispatch_delete(&tuple);
        self.active_tuple_count.fetch_sub(1, Ordering::Relaxed);
        if allowed {
            block.free(idx);
        } else {
            let mut flags = tuple.flags;
            flags.pending_delete = true;
            block.write(idx, Tuple::new(address, flags, tuple.payload.to_vec()));
        }
        Ok(())
    }

    /// Simulate compaction removing `block_id` from existence. The
    /// surviving (live, not dirty-marked) tuples are handed to every
    /// registered context via `on_block_compacted_away` before the block
    /// is dropped. This set is table-wide and not filtered by any one
    /// context's cursor position — a table may have several concurrent
    /// scans at different points in the block list, so only each
    /// context's own cursor knows which of these rows it already emitted.
    /// That exclusion happens downstream, per context, in
    /// `LiveCursor::notify_block_was_compacted_away`.
    pub fn compact_block(&self, block_id: BlockId) -> Result<()> {
        let mut blocks = self.blocks.lock().unwrap();
        let pos = blocks
            .iter()
            .position(|b| b.id() == block_id)
            .ok_or(Error::NoSuchBlock(block_id))?;
        let block = blocks.remove(pos);
        drop(blocks);

        let surviving: Vec<Tuple> = block
            .occupied_tuples()
            .into_iter()
            .filter(|t| !t.flags.dirty && !t.is_pending_delete())
            .collect();
        self.contexts.dispatch_block_compacted_away(block_id, &surviving);
        Ok(())
    }

    /// Number of live (non-dirty, non-pending-delete) tuples right now.
    fn live_tuple_count(&self) -> i64 {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.occupied_tuples())
            .filter(|t| !t.flags.dirty && !t.is_pending_delete())
            .count() as i64
    }

    /// Begin a snapshot scan: activates the surgeon, constructs and
    /// registers a `CowScanContext`, and activates it. The total live row
    /// count is captured at this instant; pass `None` for
    /// untracked/test mode.
    pub fn begin_snapshot(&self, total_tuples: Option<i64>) -> ContextHandle {
        self.begin_snapshot_with_config(total_tuples, CowScanConfig::default())
    }

    /// As `begin_snapshot`, with an explicit `CowScanConfig`.
    pub fn begin_snapshot_with_config(
        &self,
        total_tuples: Option<i64>,
        config: CowScanConfig,
    ) -> ContextHandle {
        let total = total_tuples.unwrap_or_else(|| self.live_tuple_count());
        let surgeon: Arc<dyn Surgeon> = self.self_ref.upgrade().expect("table still alive") as Arc<dyn Surgeon>;
        let mut context = CowScanContext::with_config(surgeon, total, config);
        context.activate();
        self.contexts.register(context)
    }

    /// Pull the next tuple from an active scan.
    pub fn advance(&self, handle: ContextHandle) -> Option<Tuple> {
        self.contexts.with_context(handle, CowScanContext::advance).flatten()
    }

    /// Release a tuple returned by `advance`.
    pub fn cleanup_tuple(&self, handle: ContextHandle, tuple: &Tuple, delete_tuple: bool) {
        self.contexts.with_context(handle, |ctx| ctx.cleanup_tuple(tuple, delete_tuple));
    }

    /// Reconciliation diagnostic check: does `tuples_remaining` match
    /// what the live cursor and side table actually still hold?
    pub fn check_remaining_tuples(&self, handle: ContextHandle, label: &str) {
        self.contexts
            .with_context(handle, |ctx| ctx.check_remaining_tuples(label));
    }

    /// Whether `handle`'s scan reconciled cleanly once it was drained.
    /// `None` if the handle is no longer registered.
    pub fn reconciled_cleanly(&self, handle: ContextHandle) -> Option<bool> {
        self.contexts.with_context(handle, |ctx| ctx.reconciled_cleanly())
    }

    /// Remove `handle` from the registry once its scan has fully
    /// reconciled (or been abandoned).
    pub fn end_snapshot(&self, handle: ContextHandle) -> Option<CowScanContext> {
        self.contexts.unregister(handle)
    }

    /// Number of active scans currently registered.
    pub fn active_scan_count(&self) -> usize {
        self.contexts.len()
    }
}

fn apply_decision(flags: &mut TupleFlags, decision: DirtyDecision) {
    match decision {
        DirtyDecision::SetDirty => flags.dirty = true,
        DirtyDecision::ClearDirty => flags.dirty = false,
        DirtyDecision::NoOp => {}
    }
}

impl Surgeon for ReferenceTable {
    fn activate_snapshot(&self) {
        let mut active = self.snapshot_active.lock().unwrap();
        *active = true;
        self.original_tuple_count
            .store(self.live_tuple_count().max(0) as u64, Ordering::Relaxed);
        for block in self.blocks.lock().unwrap().iter() {
            *block.pending.lock().unwrap() = true;
        }
    }

    fn deactivate_snapshot(&self) {
        *self.snapshot_active.lock().unwrap() = false;
    }

    fn delete_tuple_storage(&self, tuple: TupleAddress, block: &BlockHandle) -> Result<()> {
        let idx = tuple.slot.0 as usize;
        if block.slot_count() <= idx {
            return Err(Error::NoSuchTuple(tuple));
        }
        match block.slot(idx) {
            crate::block::SlotState::Occupied(_) => {
                block.set_dirty(idx, false);
                if let Some(reference) = self.find_block(block.id()) {
                    reference.free(idx);
                }
                Ok(())
            }
            crate::block::SlotState::Empty => Err(Error::DoubleFree(tuple)),
        }
    }

    fn delete_tuple_for_undo(&self, address: TupleAddress, _is_txnal: bool) -> Result<()> {
        let block = self.find_block(address.block).ok_or(Error::NoSuchBlock(address.block))?;
        let idx = address.slot.0 as usize;
        if block.read(idx).is_none() {
            return Err(Error::DoubleFree(address));
        }
        block.free(idx);
        Ok(())
    }

    fn snapshot_pending_block_count(&self) -> usize {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .filter(|b| *b.pending.lock().unwrap())
            .count()
    }

    fn snapshot_pending_load_block_count(&self) -> usize {
        // This reference table keeps every row in memory; there is no
        // asynchronous load pipeline that could leave a block's rows only
        // partially materialized. A block allocated after activation holds
        // only post-activation rows, which the live cursor's block list
        // (captured once, at activation) structurally never visits — such
        // a block is not "pending load" for this snapshot, it is simply
        // invisible to it. Always zero for that reason, not because the
        // count happens to be empty.
        0
    }

    fn blocks(&self) -> Vec<BlockHandle> {
        self.blocks
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(|b| b as BlockHandle)
            .collect()
    }

    fn finished_scanning_block(&self, block: BlockId, _next_block: Option<BlockId>) {
        if let Some(b) = self.find_block(block) {
            *b.pending.lock().unwrap() = false;
        }
    }

    fn block_count_consistent(&self) -> bool {
        self.snapshot_pending_block_count() == 0
    }

    fn diagnostics(&self) -> TableDiagnostics {
        TableDiagnostics {
            table_name: self.name.clone(),
            table_type: self.table_type.clone(),
            original_tuple_count: self.original_tuple_count.load(Ordering::Relaxed),
            active_tuple_count: self.active_tuple_count.load(Ordering::Relaxed),
            partition_column: self.partition_column.clone(),
        }
    }
}

// `UNTRACKED` re-exported via `crate::context` for callers that want to
// pass it to `begin_snapshot` explicitly instead of `None`.
#[allow(dead_code)]
const _: i64 = UNTRACKED;

#[cfg(test)]
mod tests {
    use once_cell::sync::Lazy;

    use super::*;

    static TRACING: Lazy<()> = Lazy::new(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });

    fn table() -> Arc<ReferenceTable> {
        Lazy::force(&TRACING);
        ReferenceTable::new("players", "heap", None, 4)
    }

    #[test]
    fn quiescent_scan_emits_every_row_once() {
        let table = table();
        for i in 0..10u8 {
            table.insert(vec![i]);
        }
        let handle = table.begin_snapshot(None);
        let mut seen = vec![];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        table.end_snapshot(handle);
    }

    #[test]
    fn update_behind_cursor_is_invisible_to_snapshot() {
        let table = table();
        let addr = table.insert(vec![1]);
        table.insert(vec![2]);

        let handle = table.begin_snapshot(None);
        let first = table.advance(handle).unwrap();
        table.cleanup_tuple(handle, &first, false);

        table.update(addr, vec![99]).unwrap();

        let mut seen = vec![first.payload[0]];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn update_ahead_of_cursor_is_preserved_as_pre_image() {
        let table = table();
        let addr = table.insert(vec![1]);
        table.insert(vec![2]);
        table.insert(vec![3]);
        table.insert(vec![4]);

        let handle = table.begin_snapshot(None);
        table.update(addr, vec![111]).unwrap();

        let mut seen = vec![];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn delete_before_cursor_reaches_it_is_still_emitted() {
        // The row existed at activation time, so the snapshot must still
        // see it even though it is logically gone from the live table by
        // the time the cursor arrives — physical free is deferred via
        // the pending-delete flag until `cleanup_tuple` runs.
        let table = table();
        let a = table.insert(vec![1]);
        table.insert(vec![2]);

        let handle = table.begin_snapshot(None);
        table.delete(a).unwrap();

        let mut seen = vec![];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn delete_after_cursor_passed_frees_immediately() {
        let table = table();
        let a = table.insert(vec![1]);
        let b = table.insert(vec![2]);

        let handle = table.begin_snapshot(None);
        let first = table.advance(handle).unwrap();
        assert_eq!(first.address, a);
        table.cleanup_tuple(handle, &first, false);

        table.delete(a).unwrap();
        assert!(table.find_block(a.block).unwrap().read(a.slot.0 as usize).is_none());

        let second = table.advance(handle).unwrap();
        assert_eq!(second.address, b);
        table.cleanup_tuple(handle, &second, false);
        assert!(table.advance(handle).is_none());
    }

    #[test]
    fn block_compacted_mid_scan_still_yields_survivors() {
        let table = table();
        table.insert(vec![1]);
        table.insert(vec![2]);
        table.insert(vec![3]);
        table.insert(vec![4]);
        let block_id = table.blocks()[0].id();

        let handle = table.begin_snapshot(None);
        table.compact_block(block_id).unwrap();

        let mut seen = vec![];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
    }

    #[test]
    fn insert_spilling_into_a_fresh_block_still_reconciles() {
        // Table capacity is 4, so the fifth insert must allocate a second
        // block after the scan is already active. That block holds only a
        // dirty, post-activation row the live cursor's fixed block list
        // never visits — it must not count as work still outstanding.
        let table = table();
        for i in 1..=4u8 {
            table.insert(vec![i]);
        }

        let handle = table.begin_snapshot(None);
        table.insert(vec![5]);

        let mut seen = vec![];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(table.reconciled_cleanly(handle), Some(true));
    }

    #[test]
    fn block_compacted_behind_cursor_does_not_duplicate_emitted_rows() {
        let table = table();
        for i in 1..=4u8 {
            table.insert(vec![i]);
        }
        let block_id = table.blocks()[0].id();

        let handle = table.begin_snapshot(None);
        let first = table.advance(handle).unwrap();
        table.cleanup_tuple(handle, &first, false);

        // The cursor has already emitted `first`'s slot; compacting the
        // block it came from must not hand that row back out again.
        table.compact_block(block_id).unwrap();

        let mut seen = vec![first.payload[0]];
        while let Some(t) = table.advance(handle) {
            seen.push(t.payload[0]);
            table.cleanup_tuple(handle, &t, false);
        }
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3, 4]);
        assert_eq!(table.reconciled_cleanly(handle), Some(true));
    }
}
