//! One process's attachment to the shared value memory.
//!
//! [`ShmContext`] ties a [`ValueAllocator`] and an [`ArenaSegments`] to the
//! same region. The value allocator's state always starts at offset 0 and
//! the segment arena follows it:
//!
//! ```text
//! 0                                 values_end                     region_size
//! ├── ValueAllocatorInfo, registry, ─┼── SegmentsInfo, slots, segments ──┤
//! │   doing/done arrays              │                                   │
//! ```
//!
//! The first process calls [`ShmContext::create`]; every other process
//! calls [`ShmContext::attach`] on the same bytes. All mutation must happen
//! under the cache lock.
//!
//! # Examples
//!
//! ```
//! use shmcache_alloc::clock::ManualClock;
//! use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
//! use shmcache_alloc::{HeapRegion, LocalIndex, ShmContext};
//!
//! let config = ShmConfig {
//!     values: ValueAllocatorConfig::default(),
//!     segments: SegmentConfig {
//!         segment_size: 4096,
//!         stripes_per_segment: 4,
//!         max_segments: 2,
//!     },
//! };
//! let heap = HeapRegion::new(ShmContext::<ManualClock>::region_size(&config).unwrap());
//! let mut ctx = ShmContext::create(heap.attach(), &config, ManualClock::new(1)).unwrap();
//! let mut index = LocalIndex::new();
//!
//! let value = ctx.alloc(5, &mut index).unwrap();
//! ctx.write_value(&value, b"hello").unwrap();
//! index.insert(b"greeting", value);
//!
//! let mut out = [0u8; 5];
//! ctx.read_value(&value, &mut out).unwrap();
//! assert_eq!(&out, b"hello");
//! ```

extern crate alloc;

use crate::clock::Clock;
use crate::config::{ShmConfig, ValueAllocatorConfig};
use crate::error::{Result, ShmError};
use crate::metrics::{AllocMetrics, ValueAllocatorMetrics};
use crate::region::ShmRegion;
use crate::segment::{ArenaLayout, ArenaSegments};
use crate::value_allocator::{
    EvictionList, HashTable, SegmentCount, SegmentManager, ShmValue, ValueAllocator,
    ValueAllocatorLayout,
};
use alloc::collections::BTreeMap;
use alloc::string::String;
use tracing::debug;

/// Value allocator plus segment manager over one attached region.
#[derive(Debug)]
pub struct ShmContext<'a, C> {
    values: ValueAllocator<'a, C>,
    segments: ArenaSegments,
}

impl<'a, C: Clock> ShmContext<'a, C> {
    /// Bytes of region needed for `config`.
    pub fn region_size(config: &ShmConfig) -> Result<usize> {
        config.validate()?;
        let values = ValueAllocatorLayout::new(0, config.segments.max_allocators())?;
        let arena = ArenaLayout::new(values.end, &config.segments)?;
        usize::try_from(arena.end)
            .map_err(|_| ShmError::InvalidConfig("region size does not fit usize"))
    }

    /// Initialises fresh shared state in `region`.
    pub fn create(region: ShmRegion<'a>, config: &ShmConfig, clock: C) -> Result<Self> {
        let needed = Self::region_size(config)?;
        if region.len() < needed {
            return Err(ShmError::OutOfBounds {
                offset: 0,
                len: needed,
                region: region.len(),
            });
        }

        let max_allocators = config.segments.max_allocators();
        let layout = ValueAllocatorLayout::new(0, max_allocators)?;
        let values = ValueAllocator::create(region, 0, max_allocators, config.values, clock)?;
        let segments = ArenaSegments::create(values.region(), layout.end, &config.segments)?;
        debug!(size = needed, max_allocators, "shared value memory created");
        Ok(ShmContext { values, segments })
    }

    /// Binds to shared state created by another context.
    pub fn attach(region: ShmRegion<'a>, config: ValueAllocatorConfig, clock: C) -> Result<Self> {
        let values = ValueAllocator::attach(region, 0, config, clock)?;
        let layout = ValueAllocatorLayout::new(0, values.allocator_capacity()?)?;
        let segments = ArenaSegments::attach(values.region(), layout.end)?;
        debug!(allocators = values.allocator_count()?, "shared value memory attached");
        Ok(ShmContext { values, segments })
    }

    /// Allocates `size` bytes, recycling through `index` when memory runs out.
    pub fn alloc<I>(&mut self, size: u32, index: &mut I) -> Result<ShmValue>
    where
        I: HashTable + EvictionList,
    {
        self.values.alloc(size, index, &mut self.segments)
    }

    /// Returns `value`'s bytes to its stripe.
    pub fn free(&mut self, value: &ShmValue) -> Result<()> {
        self.values.free(value)
    }

    /// Copies `bytes` into `value`'s storage.
    pub fn write_value(&self, value: &ShmValue, bytes: &[u8]) -> Result<()> {
        if bytes.len() > value.size as usize {
            return Err(ShmError::OutOfBounds {
                offset: value.offset,
                len: bytes.len(),
                region: value.size as usize,
            });
        }
        self.values.region().copy_from_slice(value.offset, bytes)
    }

    /// Copies `value`'s storage into `out` (at most `value.size` bytes).
    pub fn read_value(&self, value: &ShmValue, out: &mut [u8]) -> Result<usize> {
        let len = out.len().min(value.size as usize);
        self.values
            .region()
            .copy_to_slice(value.offset, &mut out[..len])?;
        Ok(len)
    }

    /// Segment usage.
    pub fn segment_count(&self) -> Result<SegmentCount> {
        self.segments.count(self.values.region())
    }

    /// The value allocator.
    #[inline]
    pub fn values(&self) -> &ValueAllocator<'a, C> {
        &self.values
    }

    /// The segment manager.
    #[inline]
    pub fn segments(&self) -> &ArenaSegments {
        &self.segments
    }

    /// Counters for this attachment.
    #[inline]
    pub fn allocator_metrics(&self) -> &ValueAllocatorMetrics {
        self.values.metrics()
    }
}

impl<C: Clock> AllocMetrics for ShmContext<'_, C> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.values.metrics().to_btreemap();
        if let Ok(count) = self.segment_count() {
            metrics.insert("segments".into(), f64::from(count.current));
            metrics.insert("max_segments".into(), f64::from(count.max));
        }
        if let Ok(free) = self.values.free_bytes() {
            metrics.insert("free_bytes".into(), free as f64);
        }
        metrics
    }

    fn component_name(&self) -> &'static str {
        "ShmContext"
    }
}
