//! # rowcow
//!
//! Copy-on-write snapshot scanning over a mutating, block-allocated,
//! slotted-tuple in-memory table.
//!
//! A snapshot scan must observe the table exactly as it stood at the
//! moment it activated, regardless of concurrent inserts, updates,
//! deletes, and block compaction running against the same table while
//! the scan is still in progress. [`rowcow_storage::context::CowScanContext`]
//! is the engine that makes that guarantee; [`rowcow_storage::reftable`]
//! is a concrete in-memory table built to exercise it.
//!
//! This top-level crate is a thin facade: the actual scan logic lives in
//! `rowcow-storage`, built on the addressing and tuple types in
//! `rowcow-core`.
//!
//! ```
//! use rowcow::reftable::ReferenceTable;
//!
//! let table = ReferenceTable::new("events", "heap", None, 64);
//! table.insert(vec![1]);
//! table.insert(vec![2]);
//!
//! let handle = table.begin_snapshot(None);
//! let mut seen = vec![];
//! while let Some(tuple) = table.advance(handle) {
//!     seen.push(tuple.payload[0]);
//!     table.cleanup_tuple(handle, &tuple, false);
//! }
//! seen.sort();
//! assert_eq!(seen, vec![1, 2]);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use rowcow_core;
pub use rowcow_core::{Error, Result};
pub use rowcow_storage::*;
