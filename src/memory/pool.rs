//! Size-keyed recycling pool for [`BitVector`] buffers.
//!
//! Instruction handlers allocate and discard bit vectors at a high rate - every
//! popped operand and pushed result is one. The pool keeps free buffers on
//! per-length free lists so the hot path reuses storage instead of hitting the
//! allocator.
//!
//! Ownership is enforced by move semantics: [`BitVectorPool::rent`] moves a
//! buffer out of the pool and [`BitVectorPool::release`] moves it back in. Code
//! that has released a vector no longer holds it, so use-after-return is not
//! expressible. The pool is deliberately not thread-safe; one pool belongs to
//! one machine, driven by one thread.

use std::collections::HashMap;

use crate::memory::BitVector;

/// A recycling pool of [`BitVector`] buffers keyed by bit length.
///
/// # Example
///
/// ```rust
/// use trivm::BitVectorPool;
///
/// let mut pool = BitVectorPool::new();
/// let mut value = pool.rent(32, true);
/// value.as_span_mut().write_i32(42);
/// pool.release(value);
///
/// // The next rent of the same width reuses the buffer, reset to the
/// // requested initial state.
/// let value = pool.rent(32, false);
/// assert!(!value.is_fully_known());
/// ```
#[derive(Debug, Default)]
pub struct BitVectorPool {
    /// Free buffers indexed by their bit length.
    free: HashMap<usize, Vec<BitVector>>,
    /// Number of buffers handed out and never released.
    outstanding: usize,
}

impl BitVectorPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        BitVectorPool::default()
    }

    /// Rents a buffer of `count` bits.
    ///
    /// A free buffer of the requested length is reused when available, reset to
    /// all-zero bits with every bit known (`initial_known == true`) or every
    /// bit unknown; otherwise a fresh buffer is allocated.
    #[must_use]
    pub fn rent(&mut self, count: usize, initial_known: bool) -> BitVector {
        self.outstanding += 1;
        if let Some(list) = self.free.get_mut(&count) {
            if let Some(mut vector) = list.pop() {
                vector.reset(initial_known);
                return vector;
            }
        }
        BitVector::new(count, initial_known)
    }

    /// Returns a buffer to the pool.
    ///
    /// The buffer is moved into the free list for its length and may be handed
    /// to the next renter of that length.
    pub fn release(&mut self, vector: BitVector) {
        self.outstanding = self.outstanding.saturating_sub(1);
        self.free.entry(vector.count()).or_default().push(vector);
    }

    /// Number of rented buffers that have not been released yet.
    ///
    /// Useful in tests to assert the rent/release discipline of handlers.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Total number of free buffers currently held.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rent_allocates() {
        let mut pool = BitVectorPool::new();
        let vector = pool.rent(32, true);
        assert_eq!(vector.count(), 32);
        assert!(vector.is_fully_known());
        assert_eq!(pool.outstanding(), 1);
    }

    #[test]
    fn test_release_and_reuse() {
        let mut pool = BitVectorPool::new();
        let mut vector = pool.rent(64, true);
        vector.as_span_mut().write_u64(0xFFFF_FFFF_FFFF_FFFF);
        pool.release(vector);
        assert_eq!(pool.free_count(), 1);

        // Reuse resets both value and knownness.
        let vector = pool.rent(64, false);
        assert_eq!(pool.free_count(), 0);
        assert!(!vector.is_fully_known());
        assert_eq!(vector.to_bytes(), None);
    }

    #[test]
    fn test_free_lists_are_keyed_by_length() {
        let mut pool = BitVectorPool::new();
        pool.release(BitVector::new(32, true));

        // A different width must not reuse the 32-bit buffer.
        let vector = pool.rent(64, true);
        assert_eq!(vector.count(), 64);
        assert_eq!(pool.free_count(), 1);

        let vector = pool.rent(32, true);
        assert_eq!(vector.count(), 32);
        assert_eq!(pool.free_count(), 0);
    }
}
