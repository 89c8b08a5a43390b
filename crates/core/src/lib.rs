//! Core types shared by the copy-on-write snapshot scan context.
//!
//! This crate defines the foundational addressing and tuple types used
//! by `rowcow-storage`:
//! - `BlockId` / `SlotIndex` / `TupleAddress`: stable addressing within the
//!   persistent table's block list.
//! - `TupleFlags`: the per-tuple dirty / pending-delete bits the table
//!   maintains and the scan context reads and (for `dirty`) sets.
//! - `Error` / `Result`: the crate-wide error type.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod error;
pub mod tuple;

pub use address::{BlockId, SlotIndex, TupleAddress};
pub use error::{Error, Result};
pub use tuple::{Tuple, TupleFlags};
