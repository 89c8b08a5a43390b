//! The fatal-error path.
//!
//! Block-count inconsistency detected during reconciliation means the
//! storage engine's own invariants are violated, and is unrecoverable —
//! it must abort the process rather than be returned as an `Err` a caller
//! could swallow. We model that as a logged `tracing::error!` followed by
//! a panic, instead of a `Result` variant, so call sites cannot
//! accidentally treat it as recoverable.

/// Log `message` at error level, then panic with it. Never returns.
pub(crate) fn fatal(message: impl Into<String>) -> ! {
    let message = message.into();
    tracing::error!(target: "rowcow_storage::fatal", "{}", message);
    panic!("{}", message);
}
