//! Error types for the shared-memory value core.
//!
//! Expected, local conditions ([`ShmError::Empty`], [`ShmError::Full`],
//! [`ShmError::NotFound`]) are ordinary results for the caller to branch on.
//! [`ShmError::ConsistencyFault`] means the shared region may be corrupt: it
//! is logged where it is detected and must never be retried.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, ShmError>;

/// Errors returned by pool, allocator and region operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ShmError {
    /// Dequeue or remove on a pool with no elements, or without a cursor.
    #[error("object pool is empty")]
    Empty,

    /// Enqueue on a pool with no spare slot.
    #[error("object pool is full")]
    Full,

    /// The offset (or key) was not present.
    #[error("offset {0} not found")]
    NotFound(i64),

    /// Neither recycling nor growth could satisfy an allocation.
    #[error("out of value memory")]
    OutOfMemory,

    /// An internal invariant over shared state failed.
    #[error("consistency fault: {0}")]
    ConsistencyFault(Fault),

    /// A record does not fit inside the attached region.
    #[error("offset {offset} with length {len} is outside a region of {region} bytes")]
    OutOfBounds {
        /// Requested offset.
        offset: i64,
        /// Requested length in bytes.
        len: usize,
        /// Region size in bytes.
        region: usize,
    },

    /// A record offset does not satisfy the record's alignment.
    #[error("offset {offset} is not aligned to {align} bytes")]
    Misaligned {
        /// Requested offset.
        offset: i64,
        /// Required alignment.
        align: usize,
    },

    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// The specific invariant behind a [`ShmError::ConsistencyFault`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    /// A pool removal returned a different offset than the one expected.
    #[error("removed offset {removed} != expected {expected}")]
    RemovedMismatch {
        /// Offset the caller meant to remove.
        expected: i64,
        /// Offset the pool actually removed.
        removed: i64,
    },

    /// Deleting an evicted key from the hash table failed during recycling.
    #[error("hash table delete failed for entry {entry} (allocator {allocator})")]
    HashDelete {
        /// Eviction list entry offset.
        entry: i64,
        /// Striping allocator index stored in the entry.
        allocator: u32,
    },

    /// A value or entry names an allocator index that is not registered.
    #[error("unknown striping allocator index {0}")]
    UnknownAllocator(u32),

    /// A striping allocator record carries an unknown pool tag.
    #[error("striping allocator {index} has invalid pool tag {tag}")]
    InvalidPoolTag {
        /// Allocator index.
        index: u32,
        /// Raw tag read from shared memory.
        tag: u32,
    },

    /// An allocator was expected in a pool but is not a member of it.
    #[error("allocator offset {0} missing from its pool")]
    MissingFromPool(i64),

    /// Pool queue indices are outside `0..capacity`.
    #[error("corrupt pool queue: head {head}, tail {tail}, capacity {capacity}")]
    CorruptQueue {
        /// Stored head index.
        head: i32,
        /// Stored tail index.
        tail: i32,
        /// Stored capacity.
        capacity: i32,
    },
}

impl From<Fault> for ShmError {
    fn from(fault: Fault) -> Self {
        ShmError::ConsistencyFault(fault)
    }
}

impl ShmError {
    /// Returns true for errors that indicate corrupt shared state.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, ShmError::ConsistencyFault(_))
    }
}
