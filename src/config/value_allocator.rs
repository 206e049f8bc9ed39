//! Recycle policy for the value allocator.
//!
//! # Tuning
//!
//! - **`discard_memory_size`**: once a striping allocator has this many bytes
//!   (or fewer) of bump space left, it is retired from the "doing" pool. Set
//!   it around the typical value size: smaller values waste scan time on
//!   nearly full stripes, larger values strand more memory per stripe.
//! - **`max_fail_times`**: a stripe that failed more often than this is
//!   retired even if it still reports free space (large values keep missing
//!   it).
//! - **`avg_key_ttl`**: when the oldest retired stripe started filling at
//!   least this many seconds ago, its data is assumed stale and recycling is
//!   preferred over growing. `0` disables the check, so the cache grows until
//!   the segment limit before recycling anything.
//!
//! # Examples
//!
//! ```
//! use shmcache_alloc::config::ValueAllocatorConfig;
//!
//! let config = ValueAllocatorConfig {
//!     discard_memory_size: 128,
//!     max_fail_times: 8,
//!     avg_key_ttl: 600,
//! };
//! assert!(config.validate().is_ok());
//! assert!(config.ttl_recycling());
//! ```

use crate::error::{Result, ShmError};
use core::fmt;

/// Policy knobs for [`ValueAllocator`](crate::ValueAllocator).
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ValueAllocatorConfig {
    /// Retire a stripe once its remaining bump space is at most this many bytes.
    pub discard_memory_size: u64,
    /// Retire a stripe once it has failed more than this many allocations.
    pub max_fail_times: u32,
    /// Average key lifetime in seconds; `0` disables TTL-driven recycling.
    pub avg_key_ttl: u64,
}

impl ValueAllocatorConfig {
    /// Returns true when TTL-driven recycling is enabled.
    #[inline]
    pub fn ttl_recycling(&self) -> bool {
        self.avg_key_ttl > 0
    }

    /// Rejects values that would make the policy loop misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.discard_memory_size > i64::MAX as u64 {
            return Err(ShmError::InvalidConfig(
                "discard_memory_size does not fit a region offset",
            ));
        }
        Ok(())
    }
}

impl Default for ValueAllocatorConfig {
    fn default() -> Self {
        ValueAllocatorConfig {
            discard_memory_size: 128,
            max_fail_times: 8,
            avg_key_ttl: 0,
        }
    }
}

impl fmt::Debug for ValueAllocatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAllocatorConfig")
            .field("discard_memory_size", &self.discard_memory_size)
            .field("max_fail_times", &self.max_fail_times)
            .field("avg_key_ttl", &self.avg_key_ttl)
            .finish()
    }
}
