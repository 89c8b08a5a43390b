//! The COW iterator over live blocks, and the two-phase cursor variant
//! (`ScanCursor`) the scan context drives.

use std::collections::VecDeque;
use std::sync::Arc;

use rowcow_core::{BlockId, Tuple, TupleAddress};

use crate::block::{BlockHandle, SlotState};
use crate::side_table::BackupCursor;
use crate::surgeon::Surgeon;

/// Cursor over the table's block list as it existed at activation, plus
/// any blocks compacted into existence along the way (never over
/// post-activation-only blocks — those contain only dirty-marked rows the
/// cursor must skip anyway).
pub struct LiveCursor {
    surgeon: Arc<dyn Surgeon>,
    blocks: Vec<BlockHandle>,
    block_idx: usize,
    slot_idx: usize,
    current_block: Option<BlockHandle>,
    /// Rows rescued out of a block compacted away mid-scan via
    /// `notifyBlockWasCompactedAway`. Drained ahead of the main block
    /// list so they are never lost and never re-read from freed memory.
    orphaned: VecDeque<Tuple>,
    /// Diagnostic: slots skipped because the tuple was dirty.
    pub skipped_dirty_rows: u64,
    /// Diagnostic: slots skipped because they held no live tuple.
    pub skipped_inactive_rows: u64,
}

impl LiveCursor {
    /// Start a fresh live cursor over `surgeon`'s current block list.
    pub fn new(surgeon: Arc<dyn Surgeon>) -> Self {
        let blocks = surgeon.blocks();
        Self {
            surgeon,
            blocks,
            block_idx: 0,
            slot_idx: 0,
            current_block: None,
            orphaned: VecDeque::new(),
            skipped_dirty_rows: 0,
            skipped_inactive_rows: 0,
        }
    }

    /// The block currently being scanned, if any (tracked for
    /// `cleanup_tuple`'s cheap same-block free).
    pub fn current_block(&self) -> Option<&BlockHandle> {
        self.current_block.as_ref()
    }

    /// Produce the next live, non-skipped tuple, or `None` once the
    /// cursor has exhausted the block list and any rescued rows.
    pub fn next(&mut self) -> Option<Tuple> {
        if let Some(t) = self.orphaned.pop_front() {
            return Some(t);
        }

        loop {
            if self.block_idx >= self.blocks.len() {
                self.current_block = None;
                return None;
            }

            let block = self.blocks[self.block_idx].clone();
            self.current_block = Some(block.clone());

            if self.slot_idx >= block.slot_count() {
                self.finalize_block();
                continue;
            }

            let slot = self.slot_idx;
            self.slot_idx += 1;

            match block.slot(slot) {
                SlotState::Empty => {
                    self.skipped_inactive_rows += 1;
                }
                SlotState::Occupied(tuple) => {
                    if tuple.flags.dirty {
                        self.skipped_dirty_rows += 1;
                    } else {
                        return Some(tuple);
                    }
                }
            }
        }
    }

    /// Return the block just finished to the table's non-pending list and
    /// advance to the next one. Exposed so the "drain one more tuple"
    /// workaround in `CowScanContext::advance` can be expressed as an
    /// explicit call instead of a speculative extra `next()`.
    pub fn finalize_block(&mut self) {
        if self.block_idx >= self.blocks.len() {
            return;
        }
        let block_id = self.blocks[self.block_idx].id();
        let next_id = self.blocks.get(self.block_idx + 1).map(|b| b.id());
        self.surgeon.finished_scanning_block(block_id, next_id);
        self.block_idx += 1;
        self.slot_idx = 0;
    }

    /// Authoritative "has the cursor passed this slot?" oracle.
    /// Returns `true` iff the address lies in a block, or a block
    /// position, the cursor has not yet read past — including addresses
    /// in blocks the cursor never had (post-activation inserts), which by
    /// definition are never "passed".
    pub fn need_to_dirty_tuple(&self, address: TupleAddress) -> bool {
        match self.blocks.iter().position(|b| b.id() == address.block) {
            None => true,
            Some(pos) if pos < self.block_idx => false,
            Some(pos) if pos > self.block_idx => true,
            Some(_) => address.slot.0 as usize >= self.slot_idx,
        }
    }

    /// Reposition the cursor after `block_id` is compacted out of
    /// existence. `surviving` are the tuples in that block that were live
    /// and not dirty-marked, as the table computed them at compaction
    /// time (it alone knows the physical relocation). Rows this cursor
    /// has already emitted — anywhere at or behind its current position —
    /// are dropped here rather than re-queued, since each
    /// `CowScanContext` drives its own cursor and the table has no way to
    /// know, for any one of them, which rows that context already saw.
    pub fn notify_block_was_compacted_away(&mut self, block_id: BlockId, surviving: Vec<Tuple>) {
        let still_needed: Vec<Tuple> = surviving
            .into_iter()
            .filter(|t| self.need_to_dirty_tuple(t.address))
            .collect();

        if let Some(pos) = self.blocks.iter().position(|b| b.id() == block_id) {
            self.blocks.remove(pos);
            if pos < self.block_idx {
                self.block_idx -= 1;
            } else if pos == self.block_idx {
                self.slot_idx = 0;
                self.current_block = None;
            }
        }
        self.orphaned.extend(still_needed);
    }

    /// Diagnostic: how many tuples would still be emitted if no further
    /// mutation occurred (used by `checkRemainingTuples`).
    pub fn count_remaining(&self) -> usize {
        let mut count = self.orphaned.len();
        for (i, block) in self.blocks.iter().enumerate().skip(self.block_idx) {
            let start = if i == self.block_idx { self.slot_idx } else { 0 };
            for slot in start..block.slot_count() {
                if let SlotState::Occupied(t) = block.slot(slot) {
                    if !t.flags.dirty {
                        count += 1;
                    }
                }
            }
        }
        count
    }
}

/// The two-phase cursor the scan context drives: live blocks, then the
/// side table drain. A tagged variant rather than a trait object so that
/// phase-specific operations (`need_to_dirty_tuple`,
/// `notify_block_was_compacted_away`, `current_block`) are only callable
/// when actually in `ScanLive`.
pub enum ScanCursor {
    /// Scanning the persistent table's live blocks.
    ScanLive(LiveCursor),
    /// Draining the preserved-image side table.
    DrainBackup(BackupCursor),
}

impl ScanCursor {
    /// Produce the next tuple from whichever phase is active.
    pub fn next(&mut self) -> Option<Tuple> {
        match self {
            ScanCursor::ScanLive(c) => c.next(),
            ScanCursor::DrainBackup(c) => c.next(),
        }
    }
}
