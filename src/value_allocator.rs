//! Value allocator: routes value allocations to striping allocators and
//! keeps the set of serving stripes non-empty under memory pressure.
//!
//! # Pools
//!
//! Every registered stripe is in exactly one of two object pools:
//!
//! ```text
//!            alloc fails and stripe is nearly full / failing too often
//!   ┌───────┐ ───────────────────────────────────────────────▶ ┌──────┐
//!   │ DOING │                                                   │ DONE │
//!   └───────┘ ◀─────────────────────────────────────────────── └──────┘
//!               recycle evicted the stripe's last live value
//! ```
//!
//! Moves are transactions: the target pool is checked for room, the stripe
//! is removed from the source pool, the removed offset must equal the
//! expected one, then it is pushed to the target and its tag flipped.
//!
//! # Allocation
//!
//! [`ValueAllocator::alloc`] scans "doing" oldest first. If no stripe can
//! serve the request it either recycles (evicts the oldest keys until some
//! stripe becomes empty) or asks the [`SegmentManager`] for a new segment,
//! then scans exactly once more. Recycling is chosen when the segment limit
//! is reached, or when TTL recycling is on and the oldest retired stripe
//! started filling at least `avg_key_ttl` seconds ago.
//!
//! # Locking
//!
//! Nothing here locks. The caller must hold the cache-wide lock for the
//! whole call; see [`CacheLock`](crate::concurrent::CacheLock) for the
//! in-process form of that capability.

extern crate alloc;

use crate::clock::Clock;
use crate::config::ValueAllocatorConfig;
use crate::error::{Fault, Result, ShmError};
use crate::metrics::{AllocMetrics, ValueAllocatorMetrics};
use crate::object_pool::{ObjectPool, ObjectPoolInfo};
use crate::region::{align_up, ShmRecord, ShmRegion};
use crate::striping::{PoolKind, StripingAllocator};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::mem;
use tracing::{debug, error, warn};

/// Handle to a value stored in shared memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ShmValue {
    /// Region offset of the first byte.
    pub offset: i64,
    /// Registry index of the owning striping allocator.
    pub index: u32,
    /// Requested size in bytes.
    pub size: u32,
}

// SAFETY: repr(C) integers, no padding, no pointers.
unsafe impl ShmRecord for ShmValue {}

/// An eviction candidate, oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionEntry {
    /// Offset (or id) of the entry inside its list.
    pub offset: i64,
    /// Key to delete from the hash table.
    pub key: Vec<u8>,
    /// Registry index of the stripe holding the entry's value.
    pub allocator: u32,
}

/// Key lookup structure consulted while recycling.
pub trait HashTable {
    /// Deletes `key` and returns the value it referenced.
    ///
    /// Deleting must also unlink the key from the [`EvictionList`]; recycling
    /// relies on that to make progress.
    fn delete(&mut self, key: &[u8]) -> Result<ShmValue>;
}

/// Recency order of live entries.
pub trait EvictionList {
    /// The oldest entry, if any.
    fn first(&self) -> Option<EvictionEntry>;
}

/// Current and maximum number of value segments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentCount {
    /// Segments created so far.
    pub current: u32,
    /// Segment limit.
    pub max: u32,
}

impl SegmentCount {
    /// True once no further segment may be created.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.current >= self.max
    }
}

/// Provider of new value segments.
pub trait SegmentManager {
    /// Segment usage as currently recorded in the region.
    fn count(&self, region: &ShmRegion<'_>) -> Result<SegmentCount>;

    /// Creates one value segment and admits its stripes through
    /// [`ValueAllocator::admit`].
    fn create_value_segment<C: Clock>(&mut self, values: &mut ValueAllocator<'_, C>)
        -> Result<()>;
}

/// Shared header of the value allocator.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueAllocatorInfo {
    /// Stripes serving allocations.
    pub doing: ObjectPoolInfo,
    /// Stripes waiting to be recycled.
    pub done: ObjectPoolInfo,
    /// Backing array of `doing`.
    pub doing_offsets: i64,
    /// Backing array of `done`.
    pub done_offsets: i64,
    /// Registry of striping allocator records.
    pub allocators: i64,
    /// Registry slots.
    pub capacity: u32,
    /// Registered stripes.
    pub count: u32,
}

// SAFETY: repr(C) over ShmRecord fields and integers, no implicit padding.
unsafe impl ShmRecord for ValueAllocatorInfo {}

const DOING_INFO: i64 = 0;
const DONE_INFO: i64 = ObjectPoolInfo::SIZE;

/// Where the value allocator's shared state sits inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueAllocatorLayout {
    /// Header offset.
    pub header: i64,
    /// Registry offset.
    pub allocators: i64,
    /// Doing pool array offset.
    pub doing_offsets: i64,
    /// Done pool array offset.
    pub done_offsets: i64,
    /// First byte after the allocator's state.
    pub end: i64,
}

impl ValueAllocatorLayout {
    /// Plans the layout for `max_allocators` stripes starting at `base`.
    pub fn new(base: i64, max_allocators: u32) -> Result<Self> {
        if max_allocators == 0 || max_allocators >= i32::MAX as u32 {
            return Err(ShmError::InvalidConfig(
                "max_allocators must be between 1 and i32::MAX - 1",
            ));
        }
        let slots = max_allocators as i32 + 1;
        let header = align_up(base, 8);
        let allocators = header + mem::size_of::<ValueAllocatorInfo>() as i64;
        let doing_offsets = allocators + i64::from(max_allocators) * StripingAllocator::SIZE;
        let done_offsets = doing_offsets + ObjectPoolInfo::array_size(slots);
        let end = done_offsets + ObjectPoolInfo::array_size(slots);
        Ok(ValueAllocatorLayout {
            header,
            allocators,
            doing_offsets,
            done_offsets,
            end,
        })
    }

    /// Bytes between `base` and `end`.
    #[inline]
    pub fn size_from(&self, base: i64) -> i64 {
        self.end - base
    }
}

/// Process-local context of the value allocator.
pub struct ValueAllocator<'a, C> {
    region: ShmRegion<'a>,
    header: i64,
    allocators: i64,
    doing: ObjectPool,
    done: ObjectPool,
    config: ValueAllocatorConfig,
    clock: C,
    metrics: ValueAllocatorMetrics,
}

impl<'a, C: Clock> ValueAllocator<'a, C> {
    /// Lays out and initialises fresh shared state for `max_allocators`
    /// stripes at `base`, then binds to it.
    pub fn create(
        region: ShmRegion<'a>,
        base: i64,
        max_allocators: u32,
        config: ValueAllocatorConfig,
        clock: C,
    ) -> Result<Self> {
        config.validate()?;
        let layout = ValueAllocatorLayout::new(base, max_allocators)?;
        region.check_array::<u8>(layout.header, (layout.end - layout.header) as usize)?;

        let slots = max_allocators as i32 + 1;
        let info = ValueAllocatorInfo {
            doing: ObjectPoolInfo::new(slots, 0, 0)?,
            done: ObjectPoolInfo::new(slots, 0, 0)?,
            doing_offsets: layout.doing_offsets,
            done_offsets: layout.done_offsets,
            allocators: layout.allocators,
            capacity: max_allocators,
            count: 0,
        };
        region.write(layout.header, info)?;

        let mut values = Self::bind(region, layout.header, info, config, clock);
        values.doing.init_empty(&values.region)?;
        values.done.init_empty(&values.region)?;
        debug!(
            header = layout.header,
            max_allocators, "value allocator created"
        );
        Ok(values)
    }

    /// Binds to shared state another context created at `base`.
    pub fn attach(
        region: ShmRegion<'a>,
        base: i64,
        config: ValueAllocatorConfig,
        clock: C,
    ) -> Result<Self> {
        config.validate()?;
        let header = align_up(base, 8);
        let info = region.read::<ValueAllocatorInfo>(header)?;
        if info.count > info.capacity {
            error!(
                count = info.count,
                capacity = info.capacity,
                "value allocator registry count exceeds capacity"
            );
            return Err(Fault::UnknownAllocator(info.count).into());
        }
        region.check_array::<StripingAllocator>(info.allocators, info.capacity as usize)?;
        Ok(Self::bind(region, header, info, config, clock))
    }

    fn bind(
        region: ShmRegion<'a>,
        header: i64,
        info: ValueAllocatorInfo,
        config: ValueAllocatorConfig,
        clock: C,
    ) -> Self {
        ValueAllocator {
            region,
            header,
            allocators: info.allocators,
            doing: ObjectPool::bind(header + DOING_INFO, info.doing_offsets),
            done: ObjectPool::bind(header + DONE_INFO, info.done_offsets),
            config,
            clock,
            metrics: ValueAllocatorMetrics::default(),
        }
    }

    /// The attached region.
    #[inline]
    pub fn region(&self) -> &ShmRegion<'a> {
        &self.region
    }

    /// The retire/recycle policy.
    #[inline]
    pub fn config(&self) -> &ValueAllocatorConfig {
        &self.config
    }

    /// Counters for this context.
    #[inline]
    pub fn metrics(&self) -> &ValueAllocatorMetrics {
        &self.metrics
    }

    fn info(&self) -> Result<ValueAllocatorInfo> {
        self.region.read(self.header)
    }

    /// Number of registered stripes.
    pub fn allocator_count(&self) -> Result<u32> {
        Ok(self.info()?.count)
    }

    /// Number of registry slots.
    pub fn allocator_capacity(&self) -> Result<u32> {
        Ok(self.info()?.capacity)
    }

    /// Region offset of stripe `index`'s record.
    pub fn allocator_offset(&self, index: u32) -> Result<i64> {
        if index >= self.info()?.count {
            return Err(Fault::UnknownAllocator(index).into());
        }
        Ok(self.allocators + i64::from(index) * StripingAllocator::SIZE)
    }

    /// Snapshot of stripe `index`.
    pub fn allocator(&self, index: u32) -> Result<StripingAllocator> {
        self.region.read(self.allocator_offset(index)?)
    }

    /// Pool stripe `index` currently belongs to.
    pub fn pool_of(&self, index: u32) -> Result<PoolKind> {
        self.allocator(index)?.pool()
    }

    /// Stripes in the doing pool.
    pub fn doing_count(&self) -> Result<usize> {
        self.doing.count(&self.region)
    }

    /// Stripes in the done pool.
    pub fn done_count(&self) -> Result<usize> {
        self.done.count(&self.region)
    }

    /// Registry indices in the doing pool, oldest first.
    pub fn doing_members(&self) -> Result<Vec<u32>> {
        self.members(&self.doing)
    }

    /// Registry indices in the done pool, oldest first.
    pub fn done_members(&self) -> Result<Vec<u32>> {
        self.members(&self.done)
    }

    fn members(&self, pool: &ObjectPool) -> Result<Vec<u32>> {
        pool.to_vec(&self.region)?
            .into_iter()
            .map(|offset| Ok(self.region.read::<StripingAllocator>(offset)?.index))
            .collect()
    }

    /// Remaining bump space summed over every stripe.
    pub fn free_bytes(&self) -> Result<u64> {
        (0..self.allocator_count()?).try_fold(0u64, |total, index| {
            Ok(total + self.allocator(index)?.free_size())
        })
    }

    /// Registers a stripe over `[base, base + size)` and puts it in doing.
    pub fn admit(&mut self, base: i64, size: u64) -> Result<u32> {
        let info = self.info()?;
        if info.count >= info.capacity || self.doing.is_full(&self.region)? {
            return Err(ShmError::Full);
        }
        self.region.check_array::<u8>(base, size as usize)?;

        let index = info.count;
        let offset = self.allocators + i64::from(index) * StripingAllocator::SIZE;
        self.region
            .write(offset, StripingAllocator::new(index, base, size))?;
        self.region
            .update::<ValueAllocatorInfo, _>(self.header, |info| info.count += 1)?;
        self.doing.free(&self.region, offset)?;
        debug!(index, base, size, "striping allocator admitted");
        Ok(index)
    }

    /// Allocates `size` bytes, recycling or growing once if needed.
    pub fn alloc<I, S>(&mut self, size: u32, index: &mut I, segments: &mut S) -> Result<ShmValue>
    where
        I: HashTable + EvictionList,
        S: SegmentManager,
    {
        match self.alloc_inner(size, index, segments) {
            Ok(value) => {
                self.metrics.core.record_success(u64::from(size));
                Ok(value)
            }
            Err(err) => {
                self.metrics.core.record_failure();
                Err(err)
            }
        }
    }

    fn alloc_inner<I, S>(&mut self, size: u32, index: &mut I, segments: &mut S) -> Result<ShmValue>
    where
        I: HashTable + EvictionList,
        S: SegmentManager,
    {
        if let Some(value) = self.do_alloc(size)? {
            return Ok(value);
        }

        if self.should_recycle(segments)? {
            warn!(size, "no stripe can serve the request, recycling");
            self.recycle(index)?;
        } else {
            segments.create_value_segment(self)?;
            self.metrics.grows += 1;
        }

        match self.do_alloc(size)? {
            Some(value) => {
                self.metrics.retries += 1;
                Ok(value)
            }
            None => {
                error!(size, "value allocation failed after recycle or grow");
                Err(ShmError::OutOfMemory)
            }
        }
    }

    /// One scan over the doing pool.
    fn do_alloc(&mut self, size: u32) -> Result<Option<ShmValue>> {
        let now = self.clock.now();
        let mut current = self.doing.first(&self.region)?;
        while let Some(offset) = current {
            let mut stripe = self.region.read::<StripingAllocator>(offset)?;
            let allocated = stripe.alloc(size, now);
            self.region.write(offset, stripe)?;

            let drained = stripe.free_size() <= self.config.discard_memory_size;
            if let Some(value_offset) = allocated {
                if drained {
                    self.retire_current(offset)?;
                }
                return Ok(Some(ShmValue {
                    offset: value_offset,
                    index: stripe.index,
                    size,
                }));
            }

            if drained || stripe.fail_times > self.config.max_fail_times {
                self.retire_current(offset)?;
            }
            current = self.doing.next(&self.region)?;
        }
        Ok(None)
    }

    /// Moves the stripe under the doing cursor to done.
    fn retire_current(&mut self, expected: i64) -> Result<()> {
        if self.done.is_full(&self.region)? {
            error!(offset = expected, "done pool full while retiring stripe");
            return Err(ShmError::Full);
        }
        let removed = self.doing.remove(&self.region)?;
        if removed != expected {
            error!(removed, expected, "doing pool removed the wrong stripe");
            return Err(Fault::RemovedMismatch { expected, removed }.into());
        }
        self.done.free(&self.region, expected)?;
        let index = self
            .region
            .update::<StripingAllocator, _>(expected, |stripe| {
                stripe.set_pool(PoolKind::Done);
                stripe.index
            })?;
        self.metrics.retired += 1;
        debug!(index, "stripe retired to done");
        Ok(())
    }

    /// Moves the stripe at `offset` from done back to doing.
    fn revive(&mut self, offset: i64) -> Result<()> {
        if self.doing.is_full(&self.region)? {
            error!(offset, "doing pool full while reviving stripe");
            return Err(ShmError::Full);
        }
        let removed = match self.done.remove_by(&self.region, offset) {
            Ok(removed) => removed,
            Err(ShmError::NotFound(_)) => {
                error!(offset, "stripe tagged done is not in the done pool");
                return Err(Fault::MissingFromPool(offset).into());
            }
            Err(err) => return Err(err),
        };
        if removed != offset {
            error!(removed, expected = offset, "done pool removed the wrong stripe");
            return Err(Fault::RemovedMismatch {
                expected: offset,
                removed,
            }
            .into());
        }
        self.doing.free(&self.region, offset)?;
        let index = self
            .region
            .update::<StripingAllocator, _>(offset, |stripe| {
                stripe.set_pool(PoolKind::Doing);
                stripe.index
            })?;
        self.metrics.revived += 1;
        debug!(index, "stripe revived to doing");
        Ok(())
    }

    fn should_recycle<S: SegmentManager>(&mut self, segments: &S) -> Result<bool> {
        if segments.count(&self.region)?.is_exhausted() {
            return Ok(true);
        }
        let Some(offset) = self.done.first(&self.region)? else {
            return Ok(false);
        };
        if !self.config.ttl_recycling() {
            return Ok(false);
        }
        let oldest = self.region.read::<StripingAllocator>(offset)?;
        let age = self.clock.now().saturating_sub(oldest.first_alloc_time);
        Ok(age >= self.config.avg_key_ttl)
    }

    /// Evicts the oldest entries until one stripe becomes empty.
    pub fn recycle<I>(&mut self, index: &mut I) -> Result<()>
    where
        I: HashTable + EvictionList,
    {
        while let Some(entry) = index.first() {
            let value = match index.delete(&entry.key) {
                Ok(value) => value,
                Err(err) => {
                    error!(
                        entry = entry.offset,
                        allocator = entry.allocator,
                        %err,
                        "hash table delete failed while recycling"
                    );
                    return Err(Fault::HashDelete {
                        entry: entry.offset,
                        allocator: entry.allocator,
                    }
                    .into());
                }
            };
            self.metrics.evictions += 1;
            self.free(&value)?;

            let offset = self.allocator_offset(entry.allocator)?;
            let mut stripe = self.region.read::<StripingAllocator>(offset)?;
            if !stripe.try_reset() {
                continue;
            }
            self.region.write(offset, stripe)?;
            if stripe.pool()? == PoolKind::Done {
                self.revive(offset)?;
            }
            self.metrics.recycles += 1;
            debug!(index = stripe.index, "stripe recycled");
            return Ok(());
        }

        error!("unable to recycle value memory");
        self.metrics.recycle_failures += 1;
        Err(ShmError::OutOfMemory)
    }

    /// Returns `value`'s bytes to its stripe. Pool membership is unchanged.
    pub fn free(&mut self, value: &ShmValue) -> Result<()> {
        let offset = self.allocator_offset(value.index)?;
        self.region
            .update::<StripingAllocator, _>(offset, |stripe| {
                debug_assert!(
                    stripe.contains(value.offset),
                    "value at {} freed to stripe {}",
                    value.offset,
                    value.index
                );
                stripe.free(value.size)
            })?;
        self.metrics.core.record_free(u64::from(value.size));
        Ok(())
    }
}

impl<C: Clock> AllocMetrics for ValueAllocator<'_, C> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.metrics.metrics()
    }

    fn component_name(&self) -> &'static str {
        self.metrics.component_name()
    }
}

impl<C> core::fmt::Debug for ValueAllocator<'_, C> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ValueAllocator")
            .field("header", &self.header)
            .field("config", &self.config)
            .finish()
    }
}
