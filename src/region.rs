//! Offset-addressed access to a shared memory region.
//!
//! Every process maps the region at its own base address, so nothing stored
//! inside it may be a pointer. Records refer to each other by byte offset
//! from the region base and are read and written by value through
//! [`ShmRegion`], which recomputes `base + offset` on every access and checks
//! bounds and alignment first.
//!
//! Accesses copy records in and out instead of handing out references into
//! the region. Several attachments (one per process, or several per process
//! in tests) may therefore alias the same bytes; exclusivity is provided by
//! the cache lock the caller holds, not by the borrow checker.

extern crate alloc;

use crate::error::{Result, ShmError};
use alloc::boxed::Box;
use alloc::vec;
use core::marker::PhantomData;
use core::mem;
use core::ptr::{self, NonNull};

/// Marker for plain records that may live in shared memory.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` (or primitive), contain no pointers or
/// references, and accept every bit pattern as a valid value: a record may be
/// read back after another process wrote it, or from zeroed memory.
pub unsafe trait ShmRecord: Copy + 'static {}

// SAFETY: primitive integers are valid for every bit pattern.
unsafe impl ShmRecord for u8 {}
// SAFETY: as above.
unsafe impl ShmRecord for u32 {}
// SAFETY: as above.
unsafe impl ShmRecord for i32 {}
// SAFETY: as above.
unsafe impl ShmRecord for u64 {}
// SAFETY: as above.
unsafe impl ShmRecord for i64 {}

/// One attachment of a shared memory region.
///
/// The lifetime ties the attachment to whatever owns the mapping.
pub struct ShmRegion<'a> {
    base: NonNull<u8>,
    len: usize,
    _mapping: PhantomData<&'a [u8]>,
}

// Neither `Send` nor `Sync`: attachments made through safe code stay on the
// thread that made them. Crossing threads goes through `RegionHandle`.

impl<'a> ShmRegion<'a> {
    /// Attaches to `len` bytes starting at `base`.
    ///
    /// # Safety
    ///
    /// `base..base + len` must stay mapped, readable and writable for `'a`,
    /// and `base` must be aligned to at least 8 bytes. Concurrent mutation
    /// through other attachments must be excluded by the caller's lock.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, len: usize) -> Self {
        ShmRegion {
            base,
            len,
            _mapping: PhantomData,
        }
    }

    /// Region size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resolves `count` consecutive `T` records starting at `offset`.
    fn resolve<T>(&self, offset: i64, count: usize) -> Result<NonNull<T>> {
        let bytes = mem::size_of::<T>().saturating_mul(count);
        let out_of_bounds = ShmError::OutOfBounds {
            offset,
            len: bytes,
            region: self.len,
        };
        let start = usize::try_from(offset).map_err(|_| out_of_bounds)?;
        match start.checked_add(bytes) {
            Some(end) if end <= self.len => {}
            _ => return Err(out_of_bounds),
        }

        // SAFETY: start + bytes <= len, so the result stays inside the mapping.
        let ptr = unsafe { self.base.as_ptr().add(start) };
        if ptr as usize % mem::align_of::<T>() != 0 {
            return Err(ShmError::Misaligned {
                offset,
                align: mem::align_of::<T>(),
            });
        }
        // SAFETY: derived from a non-null base by an in-bounds offset.
        Ok(unsafe { NonNull::new_unchecked(ptr.cast::<T>()) })
    }

    /// Reads the record stored at `offset`.
    #[inline]
    pub fn read<T: ShmRecord>(&self, offset: i64) -> Result<T> {
        let ptr = self.resolve::<T>(offset, 1)?;
        // SAFETY: in bounds, aligned, and every bit pattern is a valid `T`.
        Ok(unsafe { ptr::read(ptr.as_ptr()) })
    }

    /// Writes `value` at `offset`.
    #[inline]
    pub fn write<T: ShmRecord>(&self, offset: i64, value: T) -> Result<()> {
        let ptr = self.resolve::<T>(offset, 1)?;
        // SAFETY: in bounds and aligned; the caller holds the cache lock.
        unsafe { ptr::write(ptr.as_ptr(), value) };
        Ok(())
    }

    /// Reads the record at `offset`, lets `f` modify it, and writes it back.
    pub fn update<T: ShmRecord, R>(&self, offset: i64, f: impl FnOnce(&mut T) -> R) -> Result<R> {
        let mut record = self.read::<T>(offset)?;
        let out = f(&mut record);
        self.write(offset, record)?;
        Ok(out)
    }

    /// Reads element `index` of the `T` array starting at `array`.
    #[inline]
    pub fn read_at<T: ShmRecord>(&self, array: i64, index: usize) -> Result<T> {
        let ptr = self.resolve::<T>(array, index.saturating_add(1))?;
        // SAFETY: the whole prefix up to `index` is in bounds.
        Ok(unsafe { ptr::read(ptr.as_ptr().add(index)) })
    }

    /// Writes element `index` of the `T` array starting at `array`.
    #[inline]
    pub fn write_at<T: ShmRecord>(&self, array: i64, index: usize, value: T) -> Result<()> {
        let ptr = self.resolve::<T>(array, index.saturating_add(1))?;
        // SAFETY: the whole prefix up to `index` is in bounds.
        unsafe { ptr::write(ptr.as_ptr().add(index), value) };
        Ok(())
    }

    /// Checks that an array of `count` records fits at `array`.
    pub fn check_array<T: ShmRecord>(&self, array: i64, count: usize) -> Result<()> {
        self.resolve::<T>(array, count).map(|_| ())
    }

    /// Copies `src` into the region at `offset`.
    pub fn copy_from_slice(&self, offset: i64, src: &[u8]) -> Result<()> {
        let ptr = self.resolve::<u8>(offset, src.len())?;
        // SAFETY: destination is in bounds; `src` is process-local memory and
        // cannot overlap the mapping through safe code.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), ptr.as_ptr(), src.len()) };
        Ok(())
    }

    /// Copies bytes at `offset` out of the region into `dst`.
    pub fn copy_to_slice(&self, offset: i64, dst: &mut [u8]) -> Result<()> {
        let ptr = self.resolve::<u8>(offset, dst.len())?;
        // SAFETY: source is in bounds and `dst` is a distinct local buffer.
        unsafe { ptr::copy_nonoverlapping(ptr.as_ptr(), dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }
}

impl core::fmt::Debug for ShmRegion<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShmRegion")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

/// Rounds `value` up to a multiple of `align` (a power of two).
#[inline]
pub const fn align_up(value: i64, align: i64) -> i64 {
    (value + align - 1) & !(align - 1)
}

/// A zero-initialised, heap-backed region.
///
/// Stands in for a real mapping when a single process owns the cache, and
/// lets tests attach several contexts to the same bytes to mimic several
/// processes.
///
/// Attachments made with [`HeapRegion::attach`] stay on the current thread,
/// so two threads cannot race through safe code:
///
/// ```compile_fail
/// use shmcache_alloc::HeapRegion;
///
/// let heap = HeapRegion::new(64);
/// std::thread::scope(|scope| {
///     scope.spawn(|| heap.attach().write(0, 1u64));
///     scope.spawn(|| heap.attach().write(0, 2u64));
/// });
/// ```
///
/// ```compile_fail
/// use shmcache_alloc::HeapRegion;
///
/// let heap = HeapRegion::new(64);
/// let region = heap.attach();
/// std::thread::scope(|scope| {
///     scope.spawn(move || region.write(0, 1u64));
/// });
/// ```
///
/// Other threads attach through a [`HeapRegion::handle`]. That attach is
/// `unsafe` and puts the locking obligation on the caller.
pub struct HeapRegion {
    words: NonNull<u64>,
    word_count: usize,
}

// SAFETY: HeapRegion owns its allocation, and attachments borrow it, so none
// can outlive a move to another thread. It is not `Sync`: `attach` is safe
// only because every attachment stays on the owning thread.
unsafe impl Send for HeapRegion {}

impl HeapRegion {
    /// Allocates a zeroed region of at least `len` bytes, 8-byte aligned.
    pub fn new(len: usize) -> Self {
        let word_count = len.div_ceil(mem::size_of::<u64>());
        let words = Box::into_raw(vec![0u64; word_count].into_boxed_slice());
        // SAFETY: Box::into_raw never returns null.
        let words = unsafe { NonNull::new_unchecked(words.cast::<u64>()) };
        HeapRegion { words, word_count }
    }

    /// Region size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.word_count * mem::size_of::<u64>()
    }

    /// Returns true for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.word_count == 0
    }

    /// Creates a new attachment to this region on the current thread.
    pub fn attach(&self) -> ShmRegion<'_> {
        // SAFETY: the allocation lives as long as `self` and is 8-byte
        // aligned. Attachments never form references into it and cannot leave
        // this thread, so their accesses are sequenced.
        unsafe { ShmRegion::from_raw_parts(self.words.cast::<u8>(), self.len()) }
    }

    /// A handle other threads can attach through.
    pub fn handle(&self) -> RegionHandle<'_> {
        RegionHandle {
            base: self.words.cast::<u8>(),
            len: self.len(),
            _mapping: PhantomData,
        }
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: reconstructs exactly the boxed slice leaked in `new`.
        unsafe {
            drop(Box::from_raw(ptr::slice_from_raw_parts_mut(
                self.words.as_ptr(),
                self.word_count,
            )));
        }
    }
}

/// A region's base and length, shareable across threads.
///
/// Attaching through a handle is `unsafe`: the region has no internal
/// synchronisation, so the caller takes over the duty of serialising every
/// access, normally by holding the cache lock while an attachment is used.
#[derive(Clone, Copy)]
pub struct RegionHandle<'a> {
    base: NonNull<u8>,
    len: usize,
    _mapping: PhantomData<&'a [u8]>,
}

// SAFETY: a handle performs no access itself; `attach` is `unsafe` and
// carries the synchronisation requirement.
unsafe impl Send for RegionHandle<'_> {}
// SAFETY: as above.
unsafe impl Sync for RegionHandle<'_> {}

impl<'a> RegionHandle<'a> {
    /// Region size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length region.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Creates an attachment on the calling thread.
    ///
    /// # Safety
    ///
    /// While the returned attachment (or anything built on it) reads or
    /// writes the region, no attachment on another thread may touch it.
    /// Holding the same `CacheLock` around every such use satisfies this.
    pub unsafe fn attach(&self) -> ShmRegion<'a> {
        // SAFETY: the handle borrows a live, aligned mapping of `len` bytes;
        // exclusion is the caller's obligation.
        unsafe { ShmRegion::from_raw_parts(self.base, self.len) }
    }
}

impl core::fmt::Debug for RegionHandle<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionHandle")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

impl core::fmt::Debug for HeapRegion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HeapRegion").field("len", &self.len()).finish()
    }
}
