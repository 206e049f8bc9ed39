//! Configuration Module
//!
//! Configuration structs have all public fields for simple instantiation:
//!
//! - **Simple**: Just create the struct with all fields set
//! - **Type safety**: All parameters must be provided at construction
//! - **Checked once**: `validate()` runs when shared state is created
//!
//! | Config | Used by | Description |
//! |--------|---------|-------------|
//! | `ValueAllocatorConfig` | [`ValueAllocator`](crate::ValueAllocator) | Retire and recycle policy |
//! | `SegmentConfig` | [`ArenaSegments`](crate::ArenaSegments) | Segment geometry and limit |
//! | `ShmConfig` | [`ShmContext`](crate::ShmContext) | Both of the above |
//!
//! # Examples
//!
//! ```
//! use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
//!
//! // 4 segments of 1MB, each split into 16 stripes of 64KB
//! let config = ShmConfig {
//!     values: ValueAllocatorConfig {
//!         discard_memory_size: 256,
//!         max_fail_times: 4,
//!         avg_key_ttl: 3600,
//!     },
//!     segments: SegmentConfig {
//!         segment_size: 1024 * 1024,
//!         stripes_per_segment: 16,
//!         max_segments: 4,
//!     },
//! };
//! assert!(config.validate().is_ok());
//! ```

pub mod segment;
pub mod value_allocator;

pub use segment::SegmentConfig;
pub use value_allocator::ValueAllocatorConfig;

use crate::error::Result;
use core::fmt;

/// Everything needed to lay out a cache's value memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShmConfig {
    /// Retire/recycle policy.
    pub values: ValueAllocatorConfig,
    /// Segment geometry.
    pub segments: SegmentConfig,
}

impl ShmConfig {
    /// Validates both halves.
    pub fn validate(&self) -> Result<()> {
        self.values.validate()?;
        self.segments.validate()
    }
}

impl fmt::Debug for ShmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmConfig")
            .field("values", &self.values)
            .field("segments", &self.segments)
            .finish()
    }
}
