//! The reference table's block: a fixed-size, interior-mutable slot array.

use std::sync::Mutex;

use rowcow_core::{BlockId, Tuple};

use crate::block::{Block, SlotState};

/// A block of `ReferenceTable`: `capacity` slots, addressed densely by
/// index, each either empty or holding one tuple.
#[derive(Debug)]
pub struct ReferenceBlock {
    id: BlockId,
    slots: Mutex<Vec<Option<Tuple>>>,
    /// Still on the active snapshot's pending list (owned by the cursor,
    /// not yet handed back via `finished_scanning_block`).
    pub(super) pending: Mutex<bool>,
}

impl ReferenceBlock {
    /// Allocate an empty block with `capacity` slots.
    pub fn new(id: BlockId, capacity: usize) -> Self {
        Self {
            id,
            slots: Mutex::new(vec![None; capacity]),
            pending: Mutex::new(false),
        }
    }

    /// Find the first empty slot, if any.
    pub(super) fn first_empty_slot(&self) -> Option<usize> {
        self.slots.lock().unwrap().iter().position(Option::is_none)
    }

    /// Write `tuple` into `idx`, which must currently be empty.
    pub(super) fn occupy(&self, idx: usize, tuple: Tuple) {
        let mut slots = self.slots.lock().unwrap();
        slots[idx] = Some(tuple);
    }

    /// Read the tuple at `idx` if occupied.
    pub(super) fn read(&self, idx: usize) -> Option<Tuple> {
        self.slots.lock().unwrap()[idx].clone()
    }

    /// Overwrite the tuple at `idx`, which must currently be occupied.
    pub(super) fn write(&self, idx: usize, tuple: Tuple) {
        let mut slots = self.slots.lock().unwrap();
        slots[idx] = Some(tuple);
    }

    /// Clear the slot at `idx`.
    pub(super) fn free(&self, idx: usize) {
        self.slots.lock().unwrap()[idx] = None;
    }

    /// All currently occupied tuples, for compaction and diagnostics.
    pub(super) fn occupied_tuples(&self) -> Vec<Tuple> {
        self.slots.lock().unwrap().iter().flatten().cloned().collect()
    }
}

impl Block for ReferenceBlock {
    fn id(&self) -> BlockId {
        self.id
    }

    fn slot_count(&self) -> usize {
        self.slots.lock().unwrap().len()
    }

    fn slot(&self, idx: usize) -> SlotState {
        match self.read(idx) {
            Some(t) => SlotState::Occupied(t),
            None => SlotState::Empty,
        }
    }

    fn set_dirty(&self, idx: usize, dirty: bool) {
        let mut slots = self.slots.lock().unwrap();
        if let Some(Some(tuple)) = slots.get_mut(idx) {
            tuple.flags.dirty = dirty;
        }
    }
}
