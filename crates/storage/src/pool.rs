//! Scratch memory for deep-copying pre-images into the side table.
//!
//! `Pool` is a scratch arena owned by one scan context and released with
//! it — no reference cycles. A thin allocation-accounting wrapper, not a
//! true bump allocator (Rust's allocator already gives us that for free),
//! but it gives the context a single place to enforce an allocation
//! ceiling and to report exhaustion as fatal: memory exhaustion during a
//! pre-image deep copy is unrecoverable for the snapshot in progress.

use rowcow_core::{Error, Result};

/// Deep-copy scratch memory owned by one `CowScanContext`.
#[derive(Debug)]
pub struct Pool {
    limit: Option<usize>,
    allocated: usize,
}

impl Pool {
    /// Create a pool with no allocation ceiling.
    pub fn new() -> Self {
        Self {
            limit: None,
            allocated: 0,
        }
    }

    /// Create a pool that fails allocations once `limit` bytes have been
    /// deep-copied through it. Primarily for exercising the "memory
    /// exhaustion is fatal" path in tests.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            allocated: 0,
        }
    }

    /// Deep-copy `bytes`, returning an owned copy or `Error::PoolExhausted`
    /// if doing so would exceed the pool's limit.
    pub fn copy(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        if let Some(limit) = self.limit {
            if self.allocated + bytes.len() > limit {
                return Err(Error::PoolExhausted(self.allocated + bytes.len()));
            }
        }
        self.allocated += bytes.len();
        Ok(bytes.to_vec())
    }

    /// Total bytes deep-copied through this pool so far.
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copies_within_limit() {
        let mut pool = Pool::with_limit(16);
        assert_eq!(pool.copy(b"hello").unwrap(), b"hello");
        assert_eq!(pool.allocated(), 5);
    }

    #[test]
    fn reports_exhaustion() {
        let mut pool = Pool::with_limit(4);
        assert!(pool.copy(b"hello").is_err());
    }

    #[test]
    fn unlimited_pool_never_fails() {
        let mut pool = Pool::new();
        for _ in 0..1000 {
            pool.copy(&[0u8; 1024]).unwrap();
        }
        assert_eq!(pool.allocated(), 1024 * 1000);
    }
}
