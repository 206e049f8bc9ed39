//! The cache lock as a capability.
//!
//! Every pool and allocator operation assumes the caller holds the
//! cache-wide exclusive lock, and none of them lock on their own. Inside one
//! process that requirement is expressed with [`CacheLock`]: the state that
//! the lock protects is only reachable through the [`CriticalSection`] guard
//! returned by [`CacheLock::enter`].
//!
//! ## Why Mutex Instead of RwLock?
//!
//! Even lookups mutate shared state here: a scan over the doing pool moves
//! the pool cursor, bumps stripe failure counters and may retire stripes. No
//! operation is read-only, so `RwLock` would only add bookkeeping.
//! `parking_lot::Mutex` is small, fair enough under contention and does not
//! poison.
//!
//! # Example
//!
//! Several threads, each with its own attachment, share one index and one
//! lock. The lock covers the whole region, which is why attaching from
//! another thread through a [`RegionHandle`](crate::RegionHandle) is
//! `unsafe`: the caller promises to touch the region only inside a critical
//! section.
//!
//! ```
//! use shmcache_alloc::clock::ManualClock;
//! use shmcache_alloc::concurrent::CacheLock;
//! use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
//! use shmcache_alloc::{HeapRegion, LocalIndex, ShmContext};
//!
//! let config = ShmConfig {
//!     values: ValueAllocatorConfig::default(),
//!     segments: SegmentConfig {
//!         segment_size: 16 * 1024,
//!         stripes_per_segment: 4,
//!         max_segments: 4,
//!     },
//! };
//! let clock = ManualClock::new(1);
//! let heap = HeapRegion::new(ShmContext::<&ManualClock>::region_size(&config).unwrap());
//! let lock = CacheLock::new(LocalIndex::new());
//! ShmContext::create(heap.attach(), &config, &clock).unwrap();
//!
//! let shared = heap.handle();
//! std::thread::scope(|scope| {
//!     for t in 0..4u8 {
//!         let (lock, clock) = (&lock, &clock);
//!         scope.spawn(move || {
//!             let mut ctx = {
//!                 let _guard = lock.enter();
//!                 // SAFETY: every use of this attachment happens under `lock`.
//!                 let region = unsafe { shared.attach() };
//!                 ShmContext::attach(region, config.values, clock).unwrap()
//!             };
//!             let mut index = lock.enter();
//!             let value = ctx.alloc(32, &mut *index).unwrap();
//!             index.insert(&[t], value);
//!         });
//!     }
//! });
//! assert_eq!(lock.enter().len(), 4);
//! ```

use core::fmt;
use core::ops::{Deref, DerefMut};
use parking_lot::{Mutex, MutexGuard};

/// Exclusive lock over the state shared by every attachment.
pub struct CacheLock<T> {
    inner: Mutex<T>,
}

impl<T> CacheLock<T> {
    /// Wraps `value`.
    pub fn new(value: T) -> Self {
        CacheLock {
            inner: Mutex::new(value),
        }
    }

    /// Blocks until the lock is held.
    pub fn enter(&self) -> CriticalSection<'_, T> {
        CriticalSection {
            guard: self.inner.lock(),
        }
    }

    /// Takes the lock only if it is free.
    pub fn try_enter(&self) -> Option<CriticalSection<'_, T>> {
        self.inner
            .try_lock()
            .map(|guard| CriticalSection { guard })
    }

    /// Runs `f` inside the critical section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut section = self.enter();
        f(&mut section)
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Unwraps the protected state.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for CacheLock<T> {
    fn default() -> Self {
        CacheLock::new(T::default())
    }
}

impl<T> fmt::Debug for CacheLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLock")
            .field("locked", &self.inner.is_locked())
            .finish()
    }
}

/// Proof that the cache lock is held. Released on drop.
pub struct CriticalSection<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for CriticalSection<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for CriticalSection<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> fmt::Debug for CriticalSection<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CriticalSection")
    }
}
