//! Copy-on-write snapshot scanning over a mutating, block-allocated table.
//!
//! The centerpiece is [`context::CowScanContext`]: given a table that
//! implements [`surgeon::Surgeon`] and whose blocks implement
//! [`block::Block`], it drives a scan that observes the table exactly as
//! it stood at activation time, regardless of concurrent inserts,
//! updates, deletes, and block compaction.
//!
//! - [`cursor`]: the two-phase live/backup scan cursor.
//! - [`side_table`]: the preserved pre-image store the cursor drains in
//!   its second phase.
//! - [`context`]: activation, the notification protocol, and end-of-scan
//!   reconciliation.
//! - [`registry`]: dispatch to every context active on one table.
//! - [`reftable`]: a concrete table implementation for exercising the
//!   above; not part of the scan context itself.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod context;
pub mod cursor;
mod fatal;
pub mod pool;
pub mod reftable;
pub mod registry;
pub mod side_table;
pub mod surgeon;

pub use block::{Block, BlockHandle, SlotState};
pub use context::{CowScanConfig, CowScanContext, DirtyDecision};
pub use cursor::{LiveCursor, ScanCursor};
pub use pool::Pool;
pub use registry::{ContextHandle, ContextRegistry};
pub use side_table::{BackupCursor, SideTable};
pub use surgeon::{Surgeon, TableDiagnostics};
