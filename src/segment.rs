//! Segment manager over a fixed arena.
//!
//! [`ArenaSegments`] reserves room for `max_segments` value segments right
//! after its own header and hands them out on demand. The free segment slots
//! are kept in an [`ObjectPool`] that starts full, so creating a segment is a
//! dequeue followed by admitting its stripes to the value allocator.
//!
//! ```text
//! ┌──────────────┬──────────────────┬───────────┬───────────┬─────┐
//! │ SegmentsInfo │ free slot array  │ segment 0 │ segment 1 │ ... │
//! └──────────────┴──────────────────┴───────────┴───────────┴─────┘
//! ```
//!
//! Segments are never returned: once `max_segments` exist the value
//! allocator can only recycle.

use crate::clock::Clock;
use crate::config::SegmentConfig;
use crate::error::{Result, ShmError};
use crate::object_pool::{ObjectPool, ObjectPoolInfo};
use crate::region::{align_up, ShmRecord, ShmRegion};
use crate::value_allocator::{SegmentCount, SegmentManager, ValueAllocator};
use core::mem;
use tracing::{debug, error};

/// Alignment of the first segment.
pub const SEGMENT_ALIGNMENT: i64 = 64;

/// Shared header of the segment arena.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentsInfo {
    /// Free segment slots.
    pub free_slots: ObjectPoolInfo,
    /// Backing array of `free_slots`.
    pub free_slot_offsets: i64,
    /// Bytes per segment.
    pub segment_size: u64,
    /// Segments created so far.
    pub current: u32,
    /// Segment limit.
    pub max: u32,
    /// Striping allocators per segment.
    pub stripes_per_segment: u32,
    _reserved: u32,
}

// SAFETY: repr(C) integers and ObjectPoolInfo, padding made explicit.
unsafe impl ShmRecord for SegmentsInfo {}

impl SegmentsInfo {
    /// Segment usage.
    #[inline]
    pub fn count(&self) -> SegmentCount {
        SegmentCount {
            current: self.current,
            max: self.max,
        }
    }

    /// Bytes per stripe, rounded down to 8.
    #[inline]
    pub fn stripe_size(&self) -> u64 {
        (self.segment_size / u64::from(self.stripes_per_segment.max(1))) & !7
    }
}

/// Ring capacity of the free slot pool: one spare slot past `max_segments`.
fn slot_capacity(config: &SegmentConfig) -> Result<i32> {
    i32::try_from(config.max_segments)
        .ok()
        .and_then(|max| max.checked_add(1))
        .ok_or(ShmError::InvalidConfig(
            "max_segments does not fit a pool capacity",
        ))
}

/// Where the arena sits inside the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaLayout {
    /// Header offset.
    pub header: i64,
    /// Free slot array offset.
    pub slot_offsets: i64,
    /// First segment.
    pub arena: i64,
    /// First byte after the last segment.
    pub end: i64,
}

impl ArenaLayout {
    /// Plans the arena for `config` starting at `base`.
    pub fn new(base: i64, config: &SegmentConfig) -> Result<Self> {
        config.validate()?;
        let header = align_up(base, 8);
        let slot_offsets = header + mem::size_of::<SegmentsInfo>() as i64;
        let slots = slot_capacity(config)?;
        let arena = align_up(
            slot_offsets + ObjectPoolInfo::array_size(slots),
            SEGMENT_ALIGNMENT,
        );
        let total = i64::try_from(config.total_size())
            .map_err(|_| ShmError::InvalidConfig("segment arena does not fit a region offset"))?;
        Ok(ArenaLayout {
            header,
            slot_offsets,
            arena,
            end: arena + total,
        })
    }
}

/// Process-local handle to the segment arena.
#[derive(Debug, Clone)]
pub struct ArenaSegments {
    header: i64,
    slots: ObjectPool,
}

impl ArenaSegments {
    /// Lays out the arena at `base` and marks every segment slot free.
    pub fn create(region: &ShmRegion<'_>, base: i64, config: &SegmentConfig) -> Result<Self> {
        let layout = ArenaLayout::new(base, config)?;
        region.check_array::<u8>(layout.header, (layout.end - layout.header) as usize)?;

        let info = SegmentsInfo {
            free_slots: ObjectPoolInfo::new(
                slot_capacity(config)?,
                layout.arena,
                config.segment_size as i64,
            )?,
            free_slot_offsets: layout.slot_offsets,
            segment_size: config.segment_size,
            current: 0,
            max: config.max_segments,
            stripes_per_segment: config.stripes_per_segment,
            _reserved: 0,
        };
        region.write(layout.header, info)?;

        let mut slots = ObjectPool::bind(layout.header, layout.slot_offsets);
        slots.init_full(region)?;
        debug!(
            arena = layout.arena,
            max_segments = config.max_segments,
            segment_size = config.segment_size,
            "segment arena created"
        );
        Ok(ArenaSegments {
            header: layout.header,
            slots,
        })
    }

    /// Binds to an arena another context created at `base`.
    pub fn attach(region: &ShmRegion<'_>, base: i64) -> Result<Self> {
        let header = align_up(base, 8);
        let info = region.read::<SegmentsInfo>(header)?;
        Ok(ArenaSegments {
            header,
            slots: ObjectPool::bind(header, info.free_slot_offsets),
        })
    }

    /// Snapshot of the shared header.
    pub fn info(&self, region: &ShmRegion<'_>) -> Result<SegmentsInfo> {
        region.read(self.header)
    }

    /// Segment slots not yet handed out.
    pub fn free_segments(&self, region: &ShmRegion<'_>) -> Result<usize> {
        self.slots.count(region)
    }
}

impl SegmentManager for ArenaSegments {
    fn count(&self, region: &ShmRegion<'_>) -> Result<SegmentCount> {
        Ok(self.info(region)?.count())
    }

    fn create_value_segment<C: Clock>(
        &mut self,
        values: &mut ValueAllocator<'_, C>,
    ) -> Result<()> {
        let info = self.info(values.region())?;
        if info.count().is_exhausted() {
            error!(max = info.max, "segment limit reached");
            return Err(ShmError::OutOfMemory);
        }

        let room = values.allocator_capacity()? - values.allocator_count()?;
        if room < info.stripes_per_segment {
            error!(
                room,
                stripes = info.stripes_per_segment,
                "allocator registry cannot hold another segment"
            );
            return Err(ShmError::Full);
        }

        let segment = match self.slots.alloc(values.region()) {
            Ok(segment) => segment,
            Err(ShmError::Empty) => return Err(ShmError::OutOfMemory),
            Err(err) => return Err(err),
        };

        let stripe = info.stripe_size();
        for i in 0..info.stripes_per_segment {
            values.admit(segment + i64::from(i) * stripe as i64, stripe)?;
        }

        let current = values
            .region()
            .update::<SegmentsInfo, _>(self.header, |info| {
                info.current += 1;
                info.current
            })?;
        debug!(segment, current, max = info.max, "value segment created");
        Ok(())
    }
}
