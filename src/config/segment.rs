//! Configuration for value segments.
//!
//! A value segment is one contiguous block of the region. It is split into
//! `stripes_per_segment` equal stripes, and each stripe is served by its own
//! striping allocator:
//!
//! ```text
//! ┌───────────────────────── segment (segment_size) ─────────────────────────┐
//! │  stripe 0  │  stripe 1  │  stripe 2  │  ...  │  stripe N-1               │
//! └──────────────────────────────────────────────────────────────────────────┘
//!        ▲            ▲
//!   allocator k  allocator k+1     (registry index grows with each segment)
//! ```
//!
//! At most `max_segments` segments are ever created. Once that many exist,
//! every allocation miss has to be served by recycling.

use crate::error::{Result, ShmError};
use core::fmt;

/// Stripes must be at least this large.
pub const MIN_STRIPE_SIZE: u64 = 64;

/// Value segment geometry.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SegmentConfig {
    /// Size of one value segment in bytes.
    pub segment_size: u64,
    /// Number of striping allocators each segment is split into.
    pub stripes_per_segment: u32,
    /// Upper bound on the number of value segments.
    pub max_segments: u32,
}

impl SegmentConfig {
    /// Size of one stripe in bytes (rounded down to 8 bytes).
    #[inline]
    pub fn stripe_size(&self) -> u64 {
        (self.segment_size / u64::from(self.stripes_per_segment.max(1))) & !7
    }

    /// Maximum number of striping allocators these segments can produce.
    #[inline]
    pub fn max_allocators(&self) -> u32 {
        self.max_segments.saturating_mul(self.stripes_per_segment)
    }

    /// Total bytes reserved for value segments.
    #[inline]
    pub fn total_size(&self) -> u64 {
        self.segment_size.saturating_mul(u64::from(self.max_segments))
    }

    /// Checks that the geometry is usable.
    pub fn validate(&self) -> Result<()> {
        if self.max_segments == 0 {
            return Err(ShmError::InvalidConfig("max_segments must be at least 1"));
        }
        if self.stripes_per_segment == 0 {
            return Err(ShmError::InvalidConfig(
                "stripes_per_segment must be at least 1",
            ));
        }
        if self.segment_size % 8 != 0 {
            return Err(ShmError::InvalidConfig(
                "segment_size must be a multiple of 8",
            ));
        }
        // pool capacities are stored as i32 and need one spare slot
        if self.max_segments >= i32::MAX as u32 {
            return Err(ShmError::InvalidConfig("max_segments must be below i32::MAX"));
        }
        match self.max_segments.checked_mul(self.stripes_per_segment) {
            Some(allocators) if allocators < i32::MAX as u32 => {}
            _ => {
                return Err(ShmError::InvalidConfig(
                    "max_segments * stripes_per_segment must be below i32::MAX",
                ))
            }
        }
        if self.stripe_size() < MIN_STRIPE_SIZE {
            return Err(ShmError::InvalidConfig("stripes are smaller than 64 bytes"));
        }
        if self.total_size() > i64::MAX as u64 / 2 {
            return Err(ShmError::InvalidConfig(
                "segments do not fit a region offset",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for SegmentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SegmentConfig")
            .field("segment_size", &self.segment_size)
            .field("stripes_per_segment", &self.stripes_per_segment)
            .field("max_segments", &self.max_segments)
            .finish()
    }
}
