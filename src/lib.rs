#![doc = include_str!("../README.md")]
//!
//! ---
//!
//! # Code Reference
//!
//! ## Layers
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  ShmContext           one attachment: alloc / free / read / write    │
//! ├──────────────────────────────────┬───────────────────────────────────┤
//! │  ValueAllocator                  │  SegmentManager (ArenaSegments)   │
//! │  doing pool ◀──▶ done pool       │  free segment slot pool           │
//! │  registry of StripingAllocators  │                                   │
//! ├──────────────────────────────────┴───────────────────────────────────┤
//! │  ObjectPool           circular free list of offsets                  │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ShmRegion            base + offset, bounds and alignment checked    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Recycling consults a [`HashTable`] and an [`EvictionList`]. The crate
//! ships [`LocalIndex`], a process-local implementation of both.
//!
//! ## Quick Reference
//!
//! | Type | Lives in | Description |
//! |------|----------|-------------|
//! | [`ObjectPoolInfo`] | region | Ring state of one pool |
//! | [`ObjectPool`] | process | Cursor + offsets of a pool |
//! | [`StripingAllocator`] | region | Bump allocator over one stripe |
//! | [`ValueAllocator`] | process | Retire, recycle and grow policy |
//! | [`ArenaSegments`] | process | Hands out value segments |
//! | [`ShmContext`] | process | Composition of the above |
//!
//! ## Example
//!
//! ```rust
//! use shmcache_alloc::clock::ManualClock;
//! use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
//! use shmcache_alloc::{HeapRegion, LocalIndex, ShmContext, ShmError};
//!
//! let config = ShmConfig {
//!     values: ValueAllocatorConfig {
//!         discard_memory_size: 64,
//!         max_fail_times: 8,
//!         avg_key_ttl: 0,
//!     },
//!     segments: SegmentConfig {
//!         segment_size: 4096,
//!         stripes_per_segment: 4,
//!         max_segments: 1,
//!     },
//! };
//! let heap = HeapRegion::new(ShmContext::<ManualClock>::region_size(&config)?);
//! let mut ctx = ShmContext::create(heap.attach(), &config, ManualClock::new(1))?;
//! let mut index = LocalIndex::new();
//!
//! // Fill the only segment; later allocations evict the oldest keys.
//! for i in 0..200u32 {
//!     let value = ctx.alloc(100, &mut index)?;
//!     if let Some(old) = index.insert(&i.to_le_bytes(), value) {
//!         ctx.free(&old)?;
//!     }
//! }
//! assert!(ctx.allocator_metrics().recycles > 0);
//! # Ok::<(), ShmError>(())
//! ```
//!
//! ## Modules
//!
//! - [`region`]: Offset-addressed view of a shared mapping
//! - [`object_pool`]: Circular free list in shared memory
//! - [`striping`]: Per-stripe bump allocator
//! - [`value_allocator`]: Allocation policy and collaborator traits
//! - [`index`]: Process-local hash table and eviction list
//! - [`segment`]: Segment manager over a fixed arena
//! - [`context`]: One process's attachment
//! - [`config`]: Configuration structures
//! - [`metrics`]: Allocation counters
//! - [`concurrent`]: In-process cache lock (requires `concurrent` feature)

#![no_std]

#[cfg(test)]
extern crate scoped_threadpool;

/// Crate error type.
pub mod error;

/// Shared region addressing.
///
/// Every reference stored in shared memory is a byte offset from the region
/// base. [`ShmRegion`] resolves offsets with bounds and alignment checks.
pub mod region;

/// Time sources for TTL-driven recycling.
pub mod clock;

/// Configuration structures.
///
/// Plain structs with public fields for the allocator policy and segment
/// geometry.
pub mod config;

/// Circular free list of offsets backed by a shared array.
pub mod object_pool;

/// Bump allocator over one stripe of a value segment.
pub mod striping;

/// Allocation metrics.
///
/// Process-local counters reported through a common trait as a sorted map.
pub mod metrics;

/// The value allocator and the traits of its collaborators.
pub mod value_allocator;

/// Process-local key index usable as hash table and eviction list.
pub mod index;

/// Reference segment manager.
pub mod segment;

/// Composition root for one attachment.
pub mod context;

/// Cache lock as a capability.
///
/// Available when the `concurrent` feature is enabled.
#[cfg(feature = "concurrent")]
pub mod concurrent;

pub use context::ShmContext;
pub use error::{Fault, Result, ShmError};
pub use index::LocalIndex;
pub use object_pool::{ObjectPool, ObjectPoolInfo};
pub use region::{HeapRegion, RegionHandle, ShmRecord, ShmRegion};
pub use segment::ArenaSegments;
pub use striping::{PoolKind, StripingAllocator};
pub use value_allocator::{
    EvictionEntry, EvictionList, HashTable, SegmentCount, SegmentManager, ShmValue,
    ValueAllocator,
};

#[cfg(feature = "concurrent")]
pub use concurrent::{CacheLock, CriticalSection};
