//! Striping allocator: a bump allocator over one stripe of a value segment.
//!
//! Each stripe `[base, end)` hands out space by bumping a cursor. Freed bytes
//! are only counted; the cursor rewinds once every byte handed out has come
//! back ([`try_reset`](StripingAllocator::try_reset)). That makes a stripe
//! cheap to fill and cheap to recycle as a whole, which is what the value
//! allocator's retire/recycle policy is built around.
//!
//! The record lives in shared memory inside the allocator registry, so its
//! pool membership is stored as a raw tag and decoded on read.

use crate::error::{Fault, Result};
use crate::region::ShmRecord;
use core::mem;

/// Alignment of every value handed out by a stripe.
pub const VALUE_ALIGNMENT: u64 = 8;

/// Which allocator pool a stripe currently belongs to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Serving allocations.
    Doing = 1,
    /// Retired, waiting to be recycled.
    Done = 2,
}

impl PoolKind {
    /// Decodes a raw tag read from shared memory.
    #[inline]
    pub fn from_raw(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(PoolKind::Doing),
            2 => Some(PoolKind::Done),
            _ => None,
        }
    }
}

/// Rounds a value size up to [`VALUE_ALIGNMENT`].
#[inline]
pub const fn aligned_size(size: u32) -> u64 {
    (size as u64 + VALUE_ALIGNMENT - 1) & !(VALUE_ALIGNMENT - 1)
}

/// Shared record describing one stripe.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StripingAllocator {
    /// Slot of this record in the allocator registry.
    pub index: u32,
    in_which_pool: u32,
    /// Failed allocations since the last reset.
    pub fail_times: u32,
    _reserved: u32,
    /// Time of the first allocation since the last reset; `0` if none.
    pub first_alloc_time: u64,
    base: i64,
    end: i64,
    cursor: i64,
    used: u64,
}

// SAFETY: repr(C) integers only with explicit padding; the pool tag is kept
// raw and validated by `pool()`.
unsafe impl ShmRecord for StripingAllocator {}

impl StripingAllocator {
    /// Bytes taken by one registry entry.
    pub const SIZE: i64 = mem::size_of::<StripingAllocator>() as i64;

    /// A fresh stripe over `[base, base + size)` belonging to the doing pool.
    pub fn new(index: u32, base: i64, size: u64) -> Self {
        StripingAllocator {
            index,
            in_which_pool: PoolKind::Doing as u32,
            fail_times: 0,
            _reserved: 0,
            first_alloc_time: 0,
            base,
            end: base + size as i64,
            cursor: base,
            used: 0,
        }
    }

    /// Decoded pool membership.
    pub fn pool(&self) -> Result<PoolKind> {
        PoolKind::from_raw(self.in_which_pool).ok_or_else(|| {
            Fault::InvalidPoolTag {
                index: self.index,
                tag: self.in_which_pool,
            }
            .into()
        })
    }

    /// Records a pool move.
    #[inline]
    pub fn set_pool(&mut self, pool: PoolKind) {
        self.in_which_pool = pool as u32;
    }

    /// Carves `size` bytes off the stripe.
    ///
    /// Returns the region offset of the new value, or `None` (and counts a
    /// failure) if the remaining bump space is too small.
    pub fn alloc(&mut self, size: u32, now: u64) -> Option<i64> {
        let needed = aligned_size(size);
        if needed > self.free_size() {
            self.fail_times = self.fail_times.saturating_add(1);
            return None;
        }

        let offset = self.cursor;
        self.cursor += needed as i64;
        self.used += needed;
        if self.first_alloc_time == 0 {
            self.first_alloc_time = now;
        }
        Some(offset)
    }

    /// Gives `size` bytes back. The space is reusable only after a reset.
    #[inline]
    pub fn free(&mut self, size: u32) {
        self.used = self.used.saturating_sub(aligned_size(size));
    }

    /// Remaining bump space in bytes.
    #[inline]
    pub fn free_size(&self) -> u64 {
        (self.end - self.cursor).max(0) as u64
    }

    /// Bytes handed out and not yet freed.
    #[inline]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Stripe size in bytes.
    #[inline]
    pub fn total_size(&self) -> u64 {
        (self.end - self.base).max(0) as u64
    }

    /// First byte of the stripe.
    #[inline]
    pub fn base(&self) -> i64 {
        self.base
    }

    /// True if `offset` lies inside this stripe.
    #[inline]
    pub fn contains(&self, offset: i64) -> bool {
        (self.base..self.end).contains(&offset)
    }

    /// Rewinds the stripe if nothing handed out is still live.
    ///
    /// Returns true when the stripe is empty and reusable.
    pub fn try_reset(&mut self) -> bool {
        if self.used != 0 {
            return false;
        }
        self.cursor = self.base;
        self.fail_times = 0;
        self.first_alloc_time = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bump_allocation() {
        let mut stripe = StripingAllocator::new(0, 1024, 64);
        assert_eq!(stripe.alloc(10, 5), Some(1024));
        assert_eq!(stripe.alloc(8, 6), Some(1040));
        assert_eq!(stripe.free_size(), 64 - 24);
        assert_eq!(stripe.used(), 24);
        assert_eq!(stripe.first_alloc_time, 5);
        assert!(stripe.contains(1087));
        assert!(!stripe.contains(1088));
    }

    #[test]
    fn test_failure_counting() {
        let mut stripe = StripingAllocator::new(3, 0, 16);
        assert_eq!(stripe.alloc(17, 1), None);
        assert_eq!(stripe.alloc(100, 1), None);
        assert_eq!(stripe.fail_times, 2);
        assert_eq!(stripe.first_alloc_time, 0);
        assert_eq!(stripe.alloc(16, 1), Some(0));
        assert_eq!(stripe.free_size(), 0);
    }

    #[test]
    fn test_reset_needs_everything_freed() {
        let mut stripe = StripingAllocator::new(0, 0, 64);
        stripe.alloc(20, 9).unwrap();
        stripe.alloc(4, 9).unwrap();
        stripe.alloc(100, 9);
        assert!(!stripe.try_reset());
        stripe.free(20);
        assert!(!stripe.try_reset());
        stripe.free(4);
        assert!(stripe.try_reset());
        assert_eq!(stripe.free_size(), 64);
        assert_eq!(stripe.fail_times, 0);
        assert_eq!(stripe.first_alloc_time, 0);
    }

    #[test]
    fn test_pool_tag() {
        let mut stripe = StripingAllocator::new(7, 0, 64);
        assert_eq!(stripe.pool().unwrap(), PoolKind::Doing);
        stripe.set_pool(PoolKind::Done);
        assert_eq!(stripe.pool().unwrap(), PoolKind::Done);
        let zeroed = StripingAllocator::default();
        assert!(zeroed.pool().unwrap_err().is_fatal());
    }

    #[test]
    fn test_aligned_size() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 8);
        assert_eq!(aligned_size(8), 8);
        assert_eq!(aligned_size(9), 16);
    }
}
