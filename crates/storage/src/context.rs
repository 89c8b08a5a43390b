//! The COW scan context itself — activation, the dual-iterator `advance`
//! protocol, the five-notification contract, and end-of-scan
//! reconciliation.

use std::sync::Arc;

use rowcow_core::{BlockId, Tuple, TupleAddress};

use crate::cursor::{LiveCursor, ScanCursor};
use crate::fatal::fatal;
use crate::pool::Pool;
use crate::side_table::SideTable;
use crate::surgeon::Surgeon;

/// Sentinel for `total_tuples`/`tuples_remaining` meaning "untracked" —
/// test mode.
pub const UNTRACKED: i64 = -1;

/// What the context decided should happen to a tuple's dirty bit.
///
/// The context never holds a pointer into the table's blocks (it only
/// ever sees tuples by value, passed in on each notification), so it
/// cannot flip the bit itself; the caller — normally the table that just
/// mutated the tuple — applies the decision to the tuple's actual slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyDecision {
    /// Set the dirty bit.
    SetDirty,
    /// Clear the dirty bit.
    ClearDirty,
    /// Leave the dirty bit as it is.
    NoOp,
}

/// Policy knobs for behavior left configurable rather than fixed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CowScanConfig {
    /// When true, a `check_remaining_tuples` discrepancy is promoted from
    /// a logged diagnostic to a fatal panic. Default `false` — log and
    /// keep going, matching the as-observed behavior of a running engine.
    pub strict_invariants: bool,
}

/// The copy-on-write snapshot scan context.
pub struct CowScanContext {
    surgeon: Arc<dyn Surgeon>,
    config: CowScanConfig,

    cursor: Option<ScanCursor>,
    side_table: Option<SideTable>,
    pool: Pool,

    finished_table_scan: bool,
    total_tuples: i64,
    tuples_remaining: i64,
    reconciled: bool,

    blocks_compacted: u64,
    serialization_batches: u64,
    inserts: u64,
    updates: u64,
    deletes: u64,

    /// Snapshot of the live cursor's skip counters taken at the moment it
    /// is retired (flip to `DrainBackup`), so they survive into the
    /// reconciliation diagnostic after the live cursor itself is gone.
    skipped_dirty_rows: u64,
    skipped_inactive_rows: u64,
}

impl CowScanContext {
    /// Construct a context over `surgeon`, expecting `total_tuples` live
    /// rows at activation time (or `UNTRACKED` for test mode).
    pub fn new(surgeon: Arc<dyn Surgeon>, total_tuples: i64) -> Self {
        Self {
            surgeon,
            config: CowScanConfig::default(),
            cursor: None,
            side_table: None,
            pool: Pool::new(),
            finished_table_scan: false,
            total_tuples,
            tuples_remaining: total_tuples,
            reconciled: false,
            blocks_compacted: 0,
            serialization_batches: 0,
            inserts: 0,
            updates: 0,
            deletes: 0,
            skipped_dirty_rows: 0,
            skipped_inactive_rows: 0,
        }
    }

    /// Construct a context with non-default policy knobs.
    pub fn with_config(surgeon: Arc<dyn Surgeon>, total_tuples: i64, config: CowScanConfig) -> Self {
        let mut ctx = Self::new(surgeon, total_tuples);
        ctx.config = config;
        ctx
    }

    // ---------------------------------------------------------------
    // activate
    // ---------------------------------------------------------------

    /// Arm the notification protocol and install a fresh live cursor.
    ///
    /// A no-op if the scan already finished and fully reconciled
    /// (`finished_table_scan && tuples_remaining == 0`) — activation is
    /// idempotent once a prior scan has reconciled.
    pub fn activate(&mut self) {
        if self.finished_table_scan && self.tuples_remaining == 0 {
            return;
        }
        self.surgeon.activate_snapshot();
        self.cursor = Some(ScanCursor::ScanLive(LiveCursor::new(Arc::clone(&self.surgeon))));
        self.side_table = Some(SideTable::new());
        self.finished_table_scan = false;
        self.tuples_remaining = self.total_tuples;
        self.reconciled = false;
        tracing::debug!(total_tuples = self.total_tuples, "snapshot activated");
    }

    // ---------------------------------------------------------------
    // advance
    // ---------------------------------------------------------------

    /// Produce the next tuple in the snapshot, or `None` once the scan is
    /// exhausted (at which point reconciliation has already run).
    pub fn advance(&mut self) -> Option<Tuple> {
        let mut tuple = self
            .cursor
            .as_mut()
            .expect("advance called before activate or after cleanup")
            .next();

        if tuple.is_none() && matches!(self.cursor, Some(ScanCursor::ScanLive(_))) {
            if let Some(ScanCursor::ScanLive(live)) = self.cursor.take() {
                self.finished_table_scan = true;
                self.skipped_dirty_rows = live.skipped_dirty_rows;
                self.skipped_inactive_rows = live.skipped_inactive_rows;
                tracing::debug!("live block scan exhausted, draining preserved-image side table");
            }
            let side_table = self.side_table.take().expect("side table present while ScanLive");
            self.cursor = Some(ScanCursor::DrainBackup(side_table.make_iterator()));
            tuple = self.cursor.as_mut().unwrap().next();
        }

        match tuple {
            Some(t) => {
                let reached_zero = self.tuples_remaining > 0 && {
                    self.tuples_remaining -= 1;
                    self.tuples_remaining == 0
                };
                if reached_zero {
                    // The block-drain hack, expressed as an explicit call
                    // to the cursor's own finalize hook rather than a
                    // speculative extra `next()`.
                    if let ScanCursor::ScanLive(live) = self.cursor.as_mut().unwrap() {
                        live.finalize_block();
                    }
                }
                Some(t)
            }
            None => {
                self.cleanup();
                None
            }
        }
    }

    // ---------------------------------------------------------------
    // notifications from the table
    // ---------------------------------------------------------------

    /// Notify the context of an insert. Always `true` — nothing to
    /// inhibit for an insert.
    pub fn on_tuple_insert(&mut self, tuple: &Tuple) -> DirtyDecision {
        self.mark_dirty(tuple, true)
    }

    /// Notify the context of an update. Always returns a decision — there
    /// is nothing to inhibit for an update either.
    pub fn on_tuple_update(&mut self, tuple: &Tuple) -> DirtyDecision {
        self.mark_dirty(tuple, false)
    }

    /// Notify the context of a delete. Returns `true` iff the physical
    /// delete may proceed immediately (the cursor has already passed this
    /// slot); `false` means the caller must defer the physical free via
    /// the pending-delete flag so the snapshot can still read the
    /// pre-image when the cursor arrives.
    pub fn on_tuple_delete(&mut self, tuple: &Tuple) -> bool {
        if tuple.flags.dirty || self.finished_table_scan {
            return true;
        }
        self.deletes += 1;
        !self.cursor_needs_to_dirty(tuple.address)
    }

    /// Notify the context that `block` was compacted out of existence.
    /// `surviving` must be exactly the tuples in that block that were
    /// live and not yet emitted or dirty-marked.
    pub fn on_block_compacted_away(&mut self, block: BlockId, surviving: &[Tuple]) {
        if self.finished_table_scan {
            return;
        }
        self.blocks_compacted += 1;
        if let Some(ScanCursor::ScanLive(live)) = self.cursor.as_mut() {
            live.notify_block_was_compacted_away(block, surviving.to_vec());
        }
    }

    fn cursor_needs_to_dirty(&self, address: TupleAddress) -> bool {
        match &self.cursor {
            Some(ScanCursor::ScanLive(live)) => live.need_to_dirty_tuple(address),
            _ => true,
        }
    }

    fn mark_dirty(&mut self, tuple: &Tuple, is_new: bool) -> DirtyDecision {
        if !is_new && tuple.flags.dirty {
            return DirtyDecision::NoOp;
        }
        if self.finished_table_scan {
            return DirtyDecision::ClearDirty;
        }
        if self.cursor_needs_to_dirty(tuple.address) {
            if is_new {
                self.inserts += 1;
            } else {
                self.updates += 1;
                let side_table = self
                    .side_table
                    .as_mut()
                    .expect("side table present while armed");
                if let Err(e) = side_table.insert_deep_copy(tuple, &mut self.pool) {
                    fatal(format!(
                        "pre-image allocation failed during snapshot of tuple {}: {e}",
                        tuple.address
                    ));
                }
            }
            DirtyDecision::SetDirty
        } else {
            DirtyDecision::ClearDirty
        }
    }

    // ---------------------------------------------------------------
    // cleanup_tuple
    // ---------------------------------------------------------------

    /// Release a tuple the consumer received from `advance` once it no
    /// longer needs it.
    pub fn cleanup_tuple(&mut self, tuple: &Tuple, delete_tuple: bool) {
        if tuple.flags.pending_delete && !tuple.flags.pending_delete_on_undo_release {
            if let Some(ScanCursor::ScanLive(live)) = &self.cursor {
                if let Some(block) = live.current_block() {
                    if let Err(e) = self.surgeon.delete_tuple_storage(tuple.address, block) {
                        tracing::warn!(address = %tuple.address, error = %e, "failed to free pending-delete tuple");
                    }
                }
            }
        } else if delete_tuple {
            if let Err(e) = self.surgeon.delete_tuple_for_undo(tuple.address, true) {
                tracing::warn!(address = %tuple.address, error = %e, "failed to delete tuple for undo");
            }
        }
    }

    // ---------------------------------------------------------------
    // reconciliation
    // ---------------------------------------------------------------

    fn cleanup(&mut self) -> bool {
        if self.tuples_remaining == UNTRACKED {
            self.tuples_remaining = 0;
            self.reconciled = true;
            return true;
        }

        let pending_block = self.surgeon.snapshot_pending_block_count();
        let pending_load_block = self.surgeon.snapshot_pending_load_block_count();

        if self.tuples_remaining == 0 && pending_block == 0 && pending_load_block == 0 {
            self.reconciled = true;
            return true;
        }

        let diag = self.surgeon.diagnostics();
        tracing::debug!(
            pending_block,
            pending_load_block,
            tuples_remaining = self.tuples_remaining,
            "snapshot did not reconcile cleanly, attempting best-effort block recovery"
        );

        if pending_block > 0 {
            for block in self.surgeon.blocks() {
                self.surgeon.finished_scanning_block(block.id(), None);
            }
        }

        if !self.surgeon.block_count_consistent() {
            fatal(format!(
                "block count inconsistent after snapshot reconciliation for table {} ({}): \
                 original={} active={} remaining={} pending_block={} pending_load_block={}",
                diag.table_name,
                diag.table_type,
                diag.original_tuple_count,
                diag.active_tuple_count,
                self.tuples_remaining,
                pending_block,
                pending_load_block,
            ));
        }

        tracing::error!(
            table = %diag.table_name,
            table_type = %diag.table_type,
            original_tuple_count = diag.original_tuple_count,
            active_tuple_count = diag.active_tuple_count,
            tuples_remaining = self.tuples_remaining,
            pending_block,
            pending_load_block,
            inserts = self.inserts,
            updates = self.updates,
            deletes = self.deletes,
            blocks_compacted = self.blocks_compacted,
            partition_column = ?diag.partition_column,
            skipped_dirty_rows = self.skipped_dirty_rows,
            skipped_inactive_rows = self.skipped_inactive_rows,
            "snapshot scan failed to reconcile: expected all tuples consumed"
        );
        self.tuples_remaining = 0;
        self.reconciled = false;
        false
    }

    // ---------------------------------------------------------------
    // checkRemainingTuples (diagnostic)
    // ---------------------------------------------------------------

    /// Assert invariant 5: `tuples_remaining == live cursor's remaining +
    /// side table length`. Only callable while still scanning live
    /// blocks. Logs a discrepancy rather than failing the scan, unless
    /// `CowScanConfig::strict_invariants` is set.
    pub fn check_remaining_tuples(&self, label: &str) {
        if self.tuples_remaining == UNTRACKED {
            return;
        }
        let live = match &self.cursor {
            Some(ScanCursor::ScanLive(live)) => live,
            _ => panic!("check_remaining_tuples called outside ScanLive"),
        };
        let count1 = live.count_remaining();
        let count2 = self.side_table.as_ref().map(SideTable::len).unwrap_or(0);
        let total = count1 + count2;
        if self.tuples_remaining as usize != total {
            let message = format!(
                "[{label}] tuples_remaining ({}) != live remaining ({count1}) + side table ({count2})",
                self.tuples_remaining
            );
            if self.config.strict_invariants {
                fatal(message);
            } else {
                tracing::error!("{}", message);
            }
        }
    }

    // ---------------------------------------------------------------
    // Accessors
    // ---------------------------------------------------------------

    /// Whether the live block scan has finished (now draining, or fully
    /// done, the side table).
    pub fn finished_table_scan(&self) -> bool {
        self.finished_table_scan
    }

    /// Remaining row countdown, or `UNTRACKED`.
    pub fn tuples_remaining(&self) -> i64 {
        self.tuples_remaining
    }

    /// Number of blocks compacted away during this scan.
    pub fn blocks_compacted(&self) -> u64 {
        self.blocks_compacted
    }

    /// Whether the scan's end-of-life reconciliation succeeded. `false`
    /// before `advance` has returned `None` at least once, or if
    /// reconciliation failed and was logged rather than treated as fatal.
    pub fn reconciled_cleanly(&self) -> bool {
        self.reconciled
    }

    /// Number of post-activation inserts observed.
    pub fn inserts(&self) -> u64 {
        self.inserts
    }

    /// Number of updates observed to not-yet-emitted rows.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    /// Number of deletes observed to not-yet-emitted rows.
    pub fn deletes(&self) -> u64 {
        self.deletes
    }

    /// Number of serialization batches recorded via
    /// `record_serialization_batch`.
    pub fn serialization_batches(&self) -> u64 {
        self.serialization_batches
    }

    /// Hook for the (out-of-scope) snapshot streamer: call once per batch
    /// of tuples handed off to the serializer.
    pub fn record_serialization_batch(&mut self) {
        self.serialization_batches += 1;
    }
}
