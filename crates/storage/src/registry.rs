//! Dispatching table notifications to every snapshot context active on a
//! partition. A table may host several concurrent snapshot contexts at
//! once; delete-notification answers combine by logical AND, and
//! insert/update dirty-bit decisions combine with "any context still
//! needing protection wins" (see `dispatch_mutation`).
//!
//! A named collection the table consults on every mutation, keyed here by
//! an opaque handle rather than a primitive name.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use rowcow_core::{BlockId, Tuple};
use rustc_hash::FxBuildHasher;

use crate::context::{CowScanContext, DirtyDecision};

/// Opaque handle identifying one registered context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(u64);

/// The set of `CowScanContext`s currently scanning a table.
///
/// Each context is wrapped in a `Mutex` purely for shared ownership — the
/// single engine thread that owns the table is the only caller that ever
/// locks it, so the lock is never contended.
#[derive(Default)]
pub struct ContextRegistry {
    next_id: AtomicU64,
    contexts: DashMap<u64, Mutex<CowScanContext>, FxBuildHasher>,
}

impl ContextRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly activated context, returning its handle.
    pub fn register(&self, context: CowScanContext) -> ContextHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.contexts.insert(id, Mutex::new(context));
        ContextHandle(id)
    }

    /// Remove a context, e.g. once its scan is reconciled or abandoned.
    pub fn unregister(&self, handle: ContextHandle) -> Option<CowScanContext> {
        self.contexts
            .remove(&handle.0)
            .map(|(_, m)| m.into_inner().unwrap_or_else(|p| p.into_inner()))
    }

    /// Run `f` against the context for `handle` while holding its lock,
    /// if still registered.
    pub fn with_context<R>(&self, handle: ContextHandle, f: impl FnOnce(&mut CowScanContext) -> R) -> Option<R> {
        self.contexts.get(&handle.0).map(|entry| {
            let mut guard = entry.value().lock().unwrap_or_else(|p| p.into_inner());
            f(&mut guard)
        })
    }

    /// Number of currently registered contexts.
    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    /// True if no context is registered.
    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Dispatch an insert notification to every registered context,
    /// combining the per-context decisions into the single dirty-bit
    /// action the table should apply: if any context still needs the row
    /// protected, it stays set regardless of what other contexts decided
    /// (the bit is shared table state, not per-context state).
    pub fn dispatch_insert(&self, tuple: &Tuple) -> DirtyDecision {
        self.dispatch_mutation(tuple, CowScanContext::on_tuple_insert)
    }

    /// Dispatch an update notification to every registered context, with
    /// the same combination rule as `dispatch_insert`.
    pub fn dispatch_update(&self, tuple: &Tuple) -> DirtyDecision {
        self.dispatch_mutation(tuple, CowScanContext::on_tuple_update)
    }

    fn dispatch_mutation(
        &self,
        tuple: &Tuple,
        notify: impl Fn(&mut CowScanContext, &Tuple) -> DirtyDecision,
    ) -> DirtyDecision {
        let mut combined = DirtyDecision::ClearDirty;
        for entry in self.contexts.iter() {
            let decision = notify(
                &mut entry.value().lock().unwrap_or_else(|p| p.into_inner()),
                tuple,
            );
            combined = match (combined, decision) {
                (DirtyDecision::SetDirty, _) | (_, DirtyDecision::SetDirty) => DirtyDecision::SetDirty,
                (DirtyDecision::NoOp, _) | (_, DirtyDecision::NoOp) => DirtyDecision::NoOp,
                _ => DirtyDecision::ClearDirty,
            };
        }
        combined
    }

    /// Dispatch a delete notification to every registered context,
    /// combining the answers by logical AND: physical delete is allowed
    /// only if every context agrees it is safe.
    pub fn dispatch_delete(&self, tuple: &Tuple) -> bool {
        let mut allowed = true;
        for entry in self.contexts.iter() {
            let ok = entry
                .value()
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .on_tuple_delete(tuple);
            allowed &= ok;
        }
        allowed
    }

    /// Dispatch a block-compacted-away notification to every registered
    /// context.
    pub fn dispatch_block_compacted_away(&self, block_id: BlockId, surviving: &[Tuple]) {
        for entry in self.contexts.iter() {
            entry
                .value()
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .on_block_compacted_away(block_id, surviving);
        }
    }
}
