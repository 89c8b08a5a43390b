//! The preserved-image side table.
//!
//! An unordered, append-only container of deep-copied pre-images. No key,
//! no de-dup, traversed at most once.

use rowcow_core::{Result, Tuple};

use crate::pool::Pool;

/// Append-only store of deep-copied tuple pre-images.
#[derive(Debug, Default)]
pub struct SideTable {
    tuples: Vec<Tuple>,
}

impl SideTable {
    /// Create an empty side table.
    pub fn new() -> Self {
        Self { tuples: Vec::new() }
    }

    /// Deep-copy `tuple`'s payload through `pool` and append it.
    ///
    /// Allocation failure is fatal to the snapshot — propagated as an
    /// `Err` here; the caller (the scan context) is the one that
    /// escalates it to the fatal path, since only the context knows
    /// whether a failure here should abort the whole process or merely
    /// this insert.
    pub fn insert_deep_copy(&mut self, tuple: &Tuple, pool: &mut Pool) -> Result<()> {
        let payload = pool.copy(&tuple.payload)?;
        let mut copy = tuple.clone();
        copy.payload = payload.into();
        self.tuples.push(copy);
        Ok(())
    }

    /// Number of preserved pre-images currently buffered.
    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    /// True if no pre-images are buffered.
    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// One-shot cursor producing each inserted tuple exactly once, in
    /// unspecified order. Must not be constructed while further
    /// `insert_deep_copy` calls are still expected — the context only
    /// does so once it flips to `DrainBackup`, by which point no further
    /// notifications can route to this side table (`markDirty` clears
    /// dirty and no-ops once `finishedTableScan` is true).
    pub fn make_iterator(self) -> BackupCursor {
        BackupCursor {
            tuples: self.tuples,
            next: 0,
        }
    }
}

/// One-shot cursor over a drained `SideTable`.
#[derive(Debug)]
pub struct BackupCursor {
    tuples: Vec<Tuple>,
    next: usize,
}

impl BackupCursor {
    /// Produce the next preserved tuple, or `None` once exhausted.
    pub fn next(&mut self) -> Option<Tuple> {
        let tuple = self.tuples.get(self.next).cloned();
        if tuple.is_some() {
            self.next += 1;
        }
        tuple
    }

    /// Number of pre-images this cursor has not yet produced.
    pub fn count_remaining(&self) -> usize {
        self.tuples.len() - self.next
    }
}
