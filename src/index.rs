//! Process-local key index.
//!
//! [`LocalIndex`] is the simplest [`HashTable`] + [`EvictionList`] the value
//! allocator can recycle through: a hash map from key to [`ShmValue`] plus a
//! recency queue ordered by a sequence number.
//!
//! ```text
//!   map:   key ──▶ (ShmValue, seq)
//!   order: seq ──▶ key          (BTreeMap, lowest seq = oldest)
//! ```
//!
//! Inserting or touching a key gives it a fresh sequence number, so the
//! oldest entry is always the first one in `order`. Deleting a key unlinks it
//! from both maps, which is what lets a recycle pass make progress.
//!
//! The index lives in process memory. Caches whose keys must be visible to
//! every attachment implement the two traits over their own shared table.

extern crate alloc;

use crate::error::{Result, ShmError};
use crate::value_allocator::{EvictionEntry, EvictionList, HashTable, ShmValue};
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;

#[cfg(not(feature = "hashbrown"))]
extern crate std;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// Key to value map with insertion/touch ordered eviction.
#[derive(Debug, Clone)]
pub struct LocalIndex {
    map: HashMap<Vec<u8>, (ShmValue, u64)>,
    order: BTreeMap<u64, Vec<u8>>,
    next_seq: u64,
}

impl LocalIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        LocalIndex {
            map: HashMap::new(),
            order: BTreeMap::new(),
            next_seq: 1,
        }
    }

    fn bump(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Maps `key` to `value` as the newest entry.
    ///
    /// Returns the value previously stored under `key`; the caller owns it
    /// and must free it.
    pub fn insert(&mut self, key: &[u8], value: ShmValue) -> Option<ShmValue> {
        let seq = self.bump();
        let previous = self.map.insert(key.to_vec(), (value, seq));
        if let Some((_, old_seq)) = previous {
            self.order.remove(&old_seq);
        }
        self.order.insert(seq, key.to_vec());
        previous.map(|(value, _)| value)
    }

    /// Looks `key` up without changing its position.
    pub fn get(&self, key: &[u8]) -> Option<&ShmValue> {
        self.map.get(key).map(|(value, _)| value)
    }

    /// Marks `key` as the newest entry. Returns false if it is absent.
    pub fn touch(&mut self, key: &[u8]) -> bool {
        let seq = self.bump();
        match self.map.get_mut(key) {
            Some((_, current)) => {
                let old = core::mem::replace(current, seq);
                if let Some(key) = self.order.remove(&old) {
                    self.order.insert(seq, key);
                }
                true
            }
            None => false,
        }
    }

    /// Unlinks `key` and returns its value.
    pub fn remove(&mut self, key: &[u8]) -> Option<ShmValue> {
        let (value, seq) = self.map.remove(key)?;
        self.order.remove(&seq);
        Some(value)
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True if the index holds no keys.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// True if `key` is present.
    #[inline]
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Keys from oldest to newest.
    pub fn keys_oldest_first(&self) -> impl Iterator<Item = &[u8]> {
        self.order.values().map(Vec::as_slice)
    }

    /// Drops every key. Values are not freed.
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }
}

impl Default for LocalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HashTable for LocalIndex {
    fn delete(&mut self, key: &[u8]) -> Result<ShmValue> {
        self.remove(key).ok_or(ShmError::NotFound(-1))
    }
}

impl EvictionList for LocalIndex {
    fn first(&self) -> Option<EvictionEntry> {
        let (&seq, key) = self.order.iter().next()?;
        let (value, _) = self.map.get(key.as_slice())?;
        Some(EvictionEntry {
            offset: seq as i64,
            key: key.clone(),
            allocator: value.index,
        })
    }
}
