//! Object Pool Property Tests
//!
//! Drives an object pool with long pseudo-random operation sequences and
//! checks it against a `VecDeque` model after every step.
//!
//! ## Test Strategy
//! - Small capacities so the ring wraps many times
//! - Enumeration + removal at every cursor position, including the tail
//! - Count, order and fullness compared with the model after each step

use shmcache_alloc::{HeapRegion, ObjectPool, ObjectPoolInfo, ShmError, ShmRegion};
use std::collections::VecDeque;

const INFO: i64 = 0;
const ARRAY: i64 = 64;

/// Deterministic xorshift so failures reproduce.
struct Rng(u64);

impl Rng {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn empty_pool(region: &ShmRegion<'_>, capacity: i32) -> ObjectPool {
    region
        .write(INFO, ObjectPoolInfo::new(capacity, 0, 0).unwrap())
        .unwrap();
    let mut pool = ObjectPool::bind(INFO, ARRAY);
    pool.init_empty(region).unwrap();
    pool
}

fn assert_matches_model(pool: &ObjectPool, region: &ShmRegion<'_>, model: &VecDeque<i64>) {
    assert_eq!(pool.count(region).unwrap(), model.len());
    assert_eq!(
        pool.to_vec(region).unwrap(),
        model.iter().copied().collect::<Vec<_>>()
    );
    assert_eq!(pool.is_empty(region).unwrap(), model.is_empty());
    let capacity = pool.capacity(region).unwrap();
    assert_eq!(pool.is_full(region).unwrap(), model.len() == capacity - 1);
}

// ============================================================================
// QUEUE PROPERTIES
// ============================================================================

#[test]
fn test_random_alloc_free_matches_fifo() {
    for capacity in [2, 3, 5, 8] {
        let heap = HeapRegion::new(1024);
        let region = heap.attach();
        let mut pool = empty_pool(&region, capacity);
        let mut model = VecDeque::new();
        let mut rng = Rng(0x9E37_79B9_7F4A_7C15 ^ capacity as u64);
        let mut next_offset = 1000;

        for _ in 0..2000 {
            if rng.below(2) == 0 {
                match pool.free(&region, next_offset) {
                    Ok(()) => model.push_back(next_offset),
                    Err(ShmError::Full) => {
                        assert_eq!(model.len(), capacity as usize - 1)
                    }
                    Err(err) => panic!("unexpected error {err}"),
                }
                next_offset += 8;
            } else {
                match pool.alloc(&region) {
                    Ok(offset) => assert_eq!(Some(offset), model.pop_front()),
                    Err(ShmError::Empty) => assert!(model.is_empty()),
                    Err(err) => panic!("unexpected error {err}"),
                }
            }
            assert_matches_model(&pool, &region, &model);
        }
    }
}

#[test]
fn test_random_remove_keeps_relative_order() {
    let heap = HeapRegion::new(1024);
    let region = heap.attach();
    let capacity = 7;
    let mut pool = empty_pool(&region, capacity);
    let mut model: VecDeque<i64> = VecDeque::new();
    let mut rng = Rng(42);
    let mut next_offset = 8;

    for _ in 0..1500 {
        match rng.below(3) {
            0 => {
                if pool.free(&region, next_offset).is_ok() {
                    model.push_back(next_offset);
                }
                next_offset += 8;
            }
            1 => {
                let _ = pool.alloc(&region).map(|_| model.pop_front());
            }
            _ => {
                if model.is_empty() {
                    assert_eq!(pool.first(&region).unwrap(), None);
                    continue;
                }
                // walk to a random position; len means "past the end"
                let target = rng.below(model.len() as u64 + 1) as usize;
                let mut current = pool.first(&region).unwrap();
                for _ in 0..target {
                    current = pool.next(&region).unwrap();
                }
                let expected_index = target.min(model.len() - 1);
                assert_eq!(current, model.get(target).copied());

                let removed = pool.remove(&region).unwrap();
                assert_eq!(Some(removed), model.remove(expected_index));
            }
        }
        assert_matches_model(&pool, &region, &model);
    }
}

#[test]
fn test_init_full_then_drain() {
    let heap = HeapRegion::new(1024);
    let region = heap.attach();
    region
        .write(INFO, ObjectPoolInfo::new(6, 4096, 512).unwrap())
        .unwrap();
    let mut pool = ObjectPool::bind(INFO, ARRAY);
    pool.init_full(&region).unwrap();

    assert!(pool.is_full(&region).unwrap());
    assert_eq!(pool.free(&region, 1), Err(ShmError::Full));
    let drained: Vec<i64> = (0..5).map(|_| pool.alloc(&region).unwrap()).collect();
    assert_eq!(drained, vec![4096, 4608, 5120, 5632, 6144]);
    assert_eq!(pool.alloc(&region), Err(ShmError::Empty));
}

// ============================================================================
// SHARED STATE
// ============================================================================

#[test]
fn test_two_handles_share_ring() {
    let heap = HeapRegion::new(1024);
    let region = heap.attach();
    let mut first = empty_pool(&region, 4);
    let mut second = ObjectPool::bind(INFO, ARRAY);

    first.free(&region, 10).unwrap();
    second.free(&region, 20).unwrap();
    assert_eq!(first.to_vec(&region).unwrap(), vec![10, 20]);

    // cursors are per handle
    assert_eq!(first.first(&region).unwrap(), Some(10));
    assert_eq!(second.first(&region).unwrap(), Some(10));
    assert_eq!(second.next(&region).unwrap(), Some(20));
    assert_eq!(second.remove(&region).unwrap(), 20);

    // the removal advanced head past the first handle's cursor
    assert_eq!(first.remove(&region), Err(ShmError::Empty));
    assert_eq!(first.first(&region).unwrap(), Some(10));
    assert_eq!(first.remove(&region).unwrap(), 10);
    assert!(first.is_empty(&region).unwrap());
}

#[test]
fn test_remove_without_cursor_is_empty_error() {
    let heap = HeapRegion::new(1024);
    let region = heap.attach();
    let mut pool = empty_pool(&region, 4);
    pool.free(&region, 1).unwrap();
    let mut fresh = ObjectPool::bind(INFO, ARRAY);
    assert_eq!(fresh.remove(&region), Err(ShmError::Empty));
    assert_eq!(pool.remove_by(&region, 2), Err(ShmError::NotFound(2)));
    assert!(pool.contains(&region, 1).unwrap());
}
