//! Circular free list of offsets kept in shared memory.
//!
//! An object pool is a fixed-capacity ring of `i64` offsets. Its metadata
//! ([`ObjectPoolInfo`]) and its backing array both live in the shared region;
//! the process-local [`ObjectPool`] only remembers where they are plus an
//! enumeration cursor.
//!
//! ```text
//!          head                       tail
//!           │                          │
//!   ┌────┬──▼─┬────┬────┬────┬────┬───▼┬────┐
//!   │    │ o1 │ o2 │ o3 │ o4 │ o5 │    │    │   capacity = 8
//!   └────┴────┴────┴────┴────┴────┴────┴────┘   count = 5, usable = 7
//! ```
//!
//! One slot always stays empty so that `head == tail` means empty and
//! `(tail + 1) % capacity == head` means full.
//!
//! The same structure serves as a free-slot list (filled with
//! [`init_full`](ObjectPool::init_full)) and as a membership set
//! (started with [`init_empty`](ObjectPool::init_empty)).

extern crate alloc;

use crate::error::{Fault, Result, ShmError};
use crate::region::{ShmRecord, ShmRegion};
use alloc::vec::Vec;
use core::mem;
use tracing::{debug, trace};

/// Ring indices of an object pool.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueInfo {
    /// Index of the oldest element.
    pub head: i32,
    /// Index one past the newest element.
    pub tail: i32,
    /// Length of the backing array; usable slots are `capacity - 1`.
    pub capacity: i32,
    _reserved: i32,
}

/// Arithmetic sequence used by [`ObjectPool::init_full`].
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectInfo {
    /// First offset handed out.
    pub base_offset: i64,
    /// Distance between consecutive offsets.
    pub element_size: i64,
}

/// Shared metadata of one object pool.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectPoolInfo {
    /// Ring state.
    pub queue: QueueInfo,
    /// Initial fill sequence.
    pub object: ObjectInfo,
}

// SAFETY: repr(C) integers only, explicit padding, no pointers.
unsafe impl ShmRecord for ObjectPoolInfo {}

impl ObjectPoolInfo {
    /// Bytes taken by the metadata record.
    pub const SIZE: i64 = mem::size_of::<ObjectPoolInfo>() as i64;

    /// Metadata for an empty ring with `capacity` array slots.
    pub fn new(capacity: i32, base_offset: i64, element_size: i64) -> Result<Self> {
        if capacity < 2 {
            return Err(ShmError::InvalidConfig(
                "object pool capacity must be at least 2",
            ));
        }
        Ok(ObjectPoolInfo {
            queue: QueueInfo {
                head: 0,
                tail: 0,
                capacity,
                _reserved: 0,
            },
            object: ObjectInfo {
                base_offset,
                element_size,
            },
        })
    }

    /// Bytes taken by a backing array of `capacity` offsets.
    #[inline]
    pub const fn array_size(capacity: i32) -> i64 {
        capacity as i64 * mem::size_of::<i64>() as i64
    }
}

impl QueueInfo {
    fn check(self) -> Result<Self> {
        let valid = self.capacity >= 2
            && (0..self.capacity).contains(&self.head)
            && (0..self.capacity).contains(&self.tail);
        if valid {
            Ok(self)
        } else {
            Err(Fault::CorruptQueue {
                head: self.head,
                tail: self.tail,
                capacity: self.capacity,
            }
            .into())
        }
    }

    #[inline]
    fn count(&self) -> usize {
        let count = if self.head == self.tail {
            0
        } else if self.head < self.tail {
            self.tail - self.head
        } else {
            (self.capacity - self.head) + self.tail
        };
        count as usize
    }

    #[inline]
    fn wrap(&self, index: i32) -> i32 {
        index.rem_euclid(self.capacity)
    }

    /// True if `index` addresses a live element.
    #[inline]
    fn is_live(&self, index: i32) -> bool {
        if self.head <= self.tail {
            (self.head..self.tail).contains(&index)
        } else {
            (self.head..self.capacity).contains(&index) || (0..self.tail).contains(&index)
        }
    }
}

/// Process-local handle to an object pool.
///
/// Holds only offsets into the region, so the same shared pool can be bound
/// by any number of attachments. Every operation takes the region explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPool {
    info: i64,
    offsets: i64,
    cursor: Option<i32>,
}

impl ObjectPool {
    /// Binds a handle to the metadata at `info` and the array at `offsets`.
    pub fn bind(info: i64, offsets: i64) -> Self {
        ObjectPool {
            info,
            offsets,
            cursor: None,
        }
    }

    /// Offset of the shared metadata.
    #[inline]
    pub fn info_offset(&self) -> i64 {
        self.info
    }

    /// Offset of the shared backing array.
    #[inline]
    pub fn offsets_offset(&self) -> i64 {
        self.offsets
    }

    /// Current enumeration cursor.
    #[inline]
    pub fn cursor(&self) -> Option<i32> {
        self.cursor
    }

    fn queue(&self, region: &ShmRegion<'_>) -> Result<QueueInfo> {
        region.read::<ObjectPoolInfo>(self.info)?.queue.check()
    }

    fn store_queue(&self, region: &ShmRegion<'_>, queue: QueueInfo) -> Result<()> {
        region.update::<ObjectPoolInfo, _>(self.info, |info| info.queue = queue)
    }

    #[inline]
    fn slot(&self, region: &ShmRegion<'_>, index: i32) -> Result<i64> {
        region.read_at::<i64>(self.offsets, index as usize)
    }

    #[inline]
    fn set_slot(&self, region: &ShmRegion<'_>, index: i32, offset: i64) -> Result<()> {
        region.write_at::<i64>(self.offsets, index as usize, offset)
    }

    /// Fills every usable slot with `base_offset + i * element_size`.
    ///
    /// Afterwards the pool holds `capacity - 1` elements and is full, with
    /// `tail == capacity - 1`. The last element of the sequence,
    /// `base_offset + (capacity - 1) * element_size`, is never produced.
    pub fn init_full(&mut self, region: &ShmRegion<'_>) -> Result<()> {
        let info = region.read::<ObjectPoolInfo>(self.info)?;
        let capacity = info.queue.capacity;
        if capacity < 2 {
            return Err(Fault::CorruptQueue {
                head: info.queue.head,
                tail: info.queue.tail,
                capacity,
            }
            .into());
        }
        region.check_array::<i64>(self.offsets, capacity as usize)?;

        let mut offset = info.object.base_offset;
        for index in 0..capacity - 1 {
            self.set_slot(region, index, offset)?;
            offset += info.object.element_size;
        }

        let queue = QueueInfo {
            head: 0,
            tail: capacity - 1,
            ..info.queue
        };
        self.store_queue(region, queue)?;
        self.cursor = None;
        debug!(
            info = self.info,
            head = queue.head,
            tail = queue.tail,
            "object pool initialised full"
        );
        Ok(())
    }

    /// Empties the pool.
    pub fn init_empty(&mut self, region: &ShmRegion<'_>) -> Result<()> {
        let info = region.read::<ObjectPoolInfo>(self.info)?;
        region.check_array::<i64>(self.offsets, info.queue.capacity.max(0) as usize)?;
        let queue = QueueInfo {
            head: 0,
            tail: 0,
            ..info.queue
        }
        .check()?;
        self.store_queue(region, queue)?;
        self.cursor = None;
        debug!(info = self.info, "object pool initialised empty");
        Ok(())
    }

    /// Length of the backing array.
    pub fn capacity(&self, region: &ShmRegion<'_>) -> Result<usize> {
        Ok(self.queue(region)?.capacity as usize)
    }

    /// Number of live elements.
    pub fn count(&self, region: &ShmRegion<'_>) -> Result<usize> {
        Ok(self.queue(region)?.count())
    }

    /// True if the pool holds no elements.
    pub fn is_empty(&self, region: &ShmRegion<'_>) -> Result<bool> {
        let queue = self.queue(region)?;
        Ok(queue.head == queue.tail)
    }

    /// True if no further element can be enqueued.
    pub fn is_full(&self, region: &ShmRegion<'_>) -> Result<bool> {
        let queue = self.queue(region)?;
        Ok(queue.wrap(queue.tail + 1) == queue.head)
    }

    /// Dequeues the oldest offset.
    pub fn alloc(&mut self, region: &ShmRegion<'_>) -> Result<i64> {
        let mut queue = self.queue(region)?;
        if queue.head == queue.tail {
            return Err(ShmError::Empty);
        }

        let offset = self.slot(region, queue.head)?;
        queue.head = queue.wrap(queue.head + 1);
        self.store_queue(region, queue)?;
        trace!(info = self.info, head = queue.head, offset, "object pool alloc");
        Ok(offset)
    }

    /// Enqueues `offset` at the tail.
    pub fn free(&mut self, region: &ShmRegion<'_>, offset: i64) -> Result<()> {
        let mut queue = self.queue(region)?;
        let next_tail = queue.wrap(queue.tail + 1);
        if next_tail == queue.head {
            return Err(ShmError::Full);
        }

        self.set_slot(region, queue.tail, offset)?;
        queue.tail = next_tail;
        self.store_queue(region, queue)?;
        trace!(info = self.info, tail = queue.tail, offset, "object pool free");
        Ok(())
    }

    /// Peeks the oldest element and points the cursor at it.
    pub fn first(&mut self, region: &ShmRegion<'_>) -> Result<Option<i64>> {
        let queue = self.queue(region)?;
        if queue.head == queue.tail {
            self.cursor = None;
            return Ok(None);
        }
        self.cursor = Some(queue.head);
        self.slot(region, queue.head).map(Some)
    }

    /// Advances the cursor and peeks the element under it.
    ///
    /// Past the newest element the cursor rests on `tail` and `None` is
    /// returned; a following [`remove`](Self::remove) then takes the newest
    /// element.
    pub fn next(&mut self, region: &ShmRegion<'_>) -> Result<Option<i64>> {
        let queue = self.queue(region)?;
        let cursor = match self.cursor {
            Some(cursor) if cursor != queue.tail => cursor,
            _ => return Ok(None),
        };

        let index = queue.wrap(cursor + 1);
        self.cursor = Some(index);
        if index == queue.tail {
            return Ok(None);
        }
        self.slot(region, index).map(Some)
    }

    /// Removes the element under the cursor and returns it.
    ///
    /// Elements between `head` and the removed slot move one slot toward
    /// `tail`, then `head` advances. Relative order is kept and an enumeration
    /// can carry on with [`next`](Self::next). Cost grows with the distance
    /// from `head`.
    pub fn remove(&mut self, region: &ShmRegion<'_>) -> Result<i64> {
        let mut queue = self.queue(region)?;
        if queue.head == queue.tail {
            return Err(ShmError::Empty);
        }
        let cursor = self.cursor.ok_or(ShmError::Empty)?;

        let index = if cursor == queue.tail {
            queue.wrap(queue.tail - 1)
        } else {
            cursor
        };
        if !queue.is_live(index) {
            return Err(ShmError::Empty);
        }

        let removed = self.slot(region, index)?;
        let mut current = index;
        while current != queue.head {
            let previous = queue.wrap(current - 1);
            let moved = self.slot(region, previous)?;
            self.set_slot(region, current, moved)?;
            current = previous;
        }

        queue.head = queue.wrap(queue.head + 1);
        self.store_queue(region, queue)?;
        trace!(info = self.info, index, removed, "object pool remove");
        Ok(removed)
    }

    /// Removes the first occurrence of `offset`.
    pub fn remove_by(&mut self, region: &ShmRegion<'_>, offset: i64) -> Result<i64> {
        let mut current = self.first(region)?;
        while let Some(candidate) = current {
            if candidate == offset {
                return self.remove(region);
            }
            current = self.next(region)?;
        }
        Err(ShmError::NotFound(offset))
    }

    /// True if `offset` is a live element. Leaves the cursor alone.
    pub fn contains(&self, region: &ShmRegion<'_>, offset: i64) -> Result<bool> {
        let queue = self.queue(region)?;
        let mut index = queue.head;
        while index != queue.tail {
            if self.slot(region, index)? == offset {
                return Ok(true);
            }
            index = queue.wrap(index + 1);
        }
        Ok(false)
    }

    /// Copies the live elements out, oldest first.
    pub fn to_vec(&self, region: &ShmRegion<'_>) -> Result<Vec<i64>> {
        let queue = self.queue(region)?;
        let mut out = Vec::with_capacity(queue.count());
        let mut index = queue.head;
        while index != queue.tail {
            out.push(self.slot(region, index)?);
            index = queue.wrap(index + 1);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::HeapRegion;
    use alloc::vec;

    const INFO: i64 = 0;
    const ARRAY: i64 = 64;

    fn make_pool(heap: &HeapRegion, capacity: i32, base: i64, step: i64) -> ObjectPool {
        let region = heap.attach();
        let info = ObjectPoolInfo::new(capacity, base, step).unwrap();
        region.write(INFO, info).unwrap();
        ObjectPool::bind(INFO, ARRAY)
    }

    #[test]
    fn test_init_full_reports_usable_slots() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 4, 1000, 10);
        pool.init_full(&region).unwrap();

        assert_eq!(pool.count(&region).unwrap(), 3);
        assert!(pool.is_full(&region).unwrap());
        assert_eq!(pool.to_vec(&region).unwrap(), vec![1000, 1010, 1020]);
        assert!(!pool.contains(&region, 1030).unwrap());
        let info: ObjectPoolInfo = region.read(INFO).unwrap();
        assert_eq!((info.queue.head, info.queue.tail), (0, 3));
        assert_eq!(pool.free(&region, 5), Err(ShmError::Full));
    }

    #[test]
    fn test_tail_wraps_after_first_alloc_of_full_pool() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 4, 1000, 10);
        pool.init_full(&region).unwrap();

        assert_eq!(pool.alloc(&region).unwrap(), 1000);
        assert_eq!(pool.count(&region).unwrap(), 2);
        pool.free(&region, 99).unwrap();
        assert_eq!(pool.count(&region).unwrap(), 3);

        let info: ObjectPoolInfo = region.read(INFO).unwrap();
        assert_eq!(info.queue.tail, 0);
        assert_eq!(info.queue.head, 1);

        assert_eq!(pool.alloc(&region).unwrap(), 1010);
        assert_eq!(pool.alloc(&region).unwrap(), 1020);
        assert_eq!(pool.alloc(&region).unwrap(), 99);
        assert_eq!(pool.alloc(&region), Err(ShmError::Empty));
    }

    #[test]
    fn test_init_empty() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 8, 0, 0);
        pool.init_empty(&region).unwrap();
        assert_eq!(pool.count(&region).unwrap(), 0);
        assert!(pool.is_empty(&region).unwrap());
        assert_eq!(pool.first(&region), Ok(None));
        assert_eq!(pool.remove(&region), Err(ShmError::Empty));
    }

    #[test]
    fn test_remove_without_cursor_is_empty() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 8, 0, 0);
        pool.init_empty(&region).unwrap();
        pool.free(&region, 7).unwrap();
        assert_eq!(pool.remove(&region), Err(ShmError::Empty));
    }

    #[test]
    fn test_remove_middle_keeps_order() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 8, 0, 0);
        pool.init_empty(&region).unwrap();
        for offset in [10, 20, 30, 40] {
            pool.free(&region, offset).unwrap();
        }

        assert_eq!(pool.first(&region).unwrap(), Some(10));
        assert_eq!(pool.next(&region).unwrap(), Some(20));
        assert_eq!(pool.next(&region).unwrap(), Some(30));
        assert_eq!(pool.remove(&region).unwrap(), 30);
        // enumeration continues after the removed element
        assert_eq!(pool.next(&region).unwrap(), Some(40));
        assert_eq!(pool.next(&region).unwrap(), None);

        assert_eq!(pool.to_vec(&region).unwrap(), vec![10, 20, 40]);
        assert_eq!(pool.count(&region).unwrap(), 3);
    }

    #[test]
    fn test_remove_at_tail_cursor_takes_newest() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 8, 0, 0);
        pool.init_empty(&region).unwrap();
        for offset in [1, 2, 3] {
            pool.free(&region, offset).unwrap();
        }
        pool.first(&region).unwrap();
        while pool.next(&region).unwrap().is_some() {}
        assert_eq!(pool.remove(&region).unwrap(), 3);
        assert_eq!(pool.to_vec(&region).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_remove_walks_back_across_index_zero() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 4, 0, 0);
        pool.init_empty(&region).unwrap();

        // move head to 2 so the ring wraps: slots [2, 3, 0]
        pool.free(&region, 0).unwrap();
        pool.free(&region, 0).unwrap();
        pool.alloc(&region).unwrap();
        pool.alloc(&region).unwrap();
        for offset in [100, 200, 300] {
            pool.free(&region, offset).unwrap();
        }
        let info: ObjectPoolInfo = region.read(INFO).unwrap();
        assert_eq!((info.queue.head, info.queue.tail), (2, 1));

        assert_eq!(pool.remove_by(&region, 300).unwrap(), 300);
        assert_eq!(pool.to_vec(&region).unwrap(), vec![100, 200]);
        let info: ObjectPoolInfo = region.read(INFO).unwrap();
        assert_eq!((info.queue.head, info.queue.tail), (3, 1));
    }

    #[test]
    fn test_remove_by_missing() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let mut pool = make_pool(&heap, 8, 0, 0);
        pool.init_empty(&region).unwrap();
        pool.free(&region, 5).unwrap();
        assert_eq!(pool.remove_by(&region, 6), Err(ShmError::NotFound(6)));
        assert_eq!(pool.count(&region).unwrap(), 1);
        assert!(pool.contains(&region, 5).unwrap());
        assert!(!pool.contains(&region, 6).unwrap());
    }

    #[test]
    fn test_corrupt_queue_is_a_fault() {
        let heap = HeapRegion::new(256);
        let region = heap.attach();
        let pool = make_pool(&heap, 4, 0, 0);
        region
            .update::<ObjectPoolInfo, _>(INFO, |info| info.queue.tail = 4)
            .unwrap();
        assert!(pool.count(&region).unwrap_err().is_fatal());
    }

    #[test]
    fn test_capacity_must_leave_a_usable_slot() {
        assert!(ObjectPoolInfo::new(1, 0, 0).is_err());
        assert!(ObjectPoolInfo::new(2, 0, 0).is_ok());
    }
}
