//! Byte allocators backing queue growth
//!
//! Queues do not allocate through these directly; they charge the allocator
//! for the slots they reserve so that a bounded budget turns queue growth
//! into a recoverable [`AllocError`] instead of an abort.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::AllocError;

/// Byte budget shared by the queues of one scheduler
///
/// Implementations must be thread-safe: completion bookkeeping may run on
/// any thread.
pub trait Allocator: Send + Sync + fmt::Debug {
    /// Reserve `bytes`, failing if the budget cannot cover them
    fn allocate(&self, bytes: usize) -> Result<(), AllocError>;

    /// Return `bytes` previously reserved with [`Allocator::allocate`]
    fn deallocate(&self, bytes: usize);

    /// Bytes currently reserved
    fn in_use(&self) -> usize;
}

/// Unlimited allocator; only tracks usage
#[derive(Debug, Default)]
pub struct SystemAllocator {
    in_use: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for SystemAllocator {
    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        self.in_use.fetch_add(bytes, Ordering::Relaxed);
        Ok(())
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::Relaxed);
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}

/// Allocator with a hard byte limit
#[derive(Debug)]
pub struct BoundedAllocator {
    limit: usize,
    in_use: AtomicUsize,
}

impl BoundedAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Allocator for BoundedAllocator {
    fn allocate(&self, bytes: usize) -> Result<(), AllocError> {
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|total| *total <= self.limit)
            })
            .map(|_| ())
            .map_err(|used| AllocError {
                requested: bytes,
                in_use: used,
                limit: self.limit,
            })
    }

    fn deallocate(&self, bytes: usize) {
        self.in_use.fetch_sub(bytes, Ordering::AcqRel);
    }

    fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }
}

impl fmt::Display for BoundedAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} bytes", self.in_use(), self.limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_allocator_tracks_usage() {
        let alloc = SystemAllocator::new();
        alloc.allocate(128).unwrap();
        alloc.allocate(64).unwrap();
        assert_eq!(alloc.in_use(), 192);
        alloc.deallocate(128);
        assert_eq!(alloc.in_use(), 64);
    }

    #[test]
    fn test_bounded_allocator_limit() {
        let alloc = BoundedAllocator::new(100);
        alloc.allocate(60).unwrap();
        let err = alloc.allocate(50).unwrap_err();
        assert_eq!(
            err,
            AllocError {
                requested: 50,
                in_use: 60,
                limit: 100
            }
        );
        // A failed request reserves nothing
        assert_eq!(alloc.in_use(), 60);
        alloc.allocate(40).unwrap();
        assert_eq!(alloc.in_use(), 100);
    }

    #[test]
    fn test_bounded_allocator_release() {
        let alloc = BoundedAllocator::new(10);
        alloc.allocate(10).unwrap();
        assert!(alloc.allocate(1).is_err());
        alloc.deallocate(5);
        assert!(alloc.allocate(5).is_ok());
        assert_eq!(alloc.to_string(), "10/10 bytes");
    }
}
