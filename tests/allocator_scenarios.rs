//! Value Allocator Scenario Tests
//!
//! Walks the allocator through its retire, grow and recycle decisions with
//! small geometries whose outcome can be worked out by hand.
//!
//! ## Test Strategy
//! - One stripe per segment unless the scenario needs more
//! - `ManualClock` for every TTL decision
//! - Pool membership checked against each stripe's tag after every step

use shmcache_alloc::clock::ManualClock;
use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
use shmcache_alloc::{
    EvictionEntry, EvictionList, Fault, HashTable, HeapRegion, LocalIndex, PoolKind, ShmContext,
    ShmError, ShmValue,
};

fn config(discard: u64, ttl: u64, segment_size: u64, stripes: u32, max_segments: u32) -> ShmConfig {
    ShmConfig {
        values: ValueAllocatorConfig {
            discard_memory_size: discard,
            max_fail_times: 8,
            avg_key_ttl: ttl,
        },
        segments: SegmentConfig {
            segment_size,
            stripes_per_segment: stripes,
            max_segments,
        },
    }
}

fn heap_for(config: &ShmConfig) -> HeapRegion {
    HeapRegion::new(ShmContext::<&ManualClock>::region_size(config).unwrap())
}

/// Every registered stripe is in exactly the pool its tag names.
fn assert_membership(ctx: &ShmContext<'_, &ManualClock>) {
    let values = ctx.values();
    let doing = values.doing_members().unwrap();
    let done = values.done_members().unwrap();
    let count = values.allocator_count().unwrap();
    assert_eq!(doing.len() + done.len(), count as usize);
    for index in 0..count {
        let expected = match values.pool_of(index).unwrap() {
            PoolKind::Doing => &doing,
            PoolKind::Done => &done,
        };
        assert_eq!(expected.iter().filter(|&&i| i == index).count(), 1);
    }
}

// ============================================================================
// RETIREMENT
// ============================================================================

#[test]
fn test_failing_stripe_below_discard_moves_once() {
    let config = config(100, 0, 256, 1, 2);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);

    // fill stripe 0 down to 48 free bytes under a policy that keeps it
    let loose = ShmConfig {
        values: ValueAllocatorConfig {
            discard_memory_size: 0,
            ..config.values
        },
        ..config
    };
    let mut filler = ShmContext::create(heap.attach(), &loose, &clock).unwrap();
    let mut index = LocalIndex::new();
    let value = filler.alloc(208, &mut index).unwrap();
    index.insert(b"big", value);
    assert_eq!(filler.values().allocator(0).unwrap().free_size(), 48);
    assert_eq!(filler.values().pool_of(0).unwrap(), PoolKind::Doing);

    // the strict attachment sees free 48 <= 100 when the request fails
    let mut ctx = ShmContext::attach(heap.attach(), config.values, &clock).unwrap();
    let value = ctx.alloc(64, &mut index).unwrap();
    assert_eq!(value.index, 1);
    assert_eq!(ctx.values().done_members().unwrap(), vec![0]);
    assert_eq!(ctx.values().doing_members().unwrap(), vec![1]);
    assert_eq!(ctx.allocator_metrics().retired, 1);
    assert_membership(&ctx);

    ctx.alloc(64, &mut index).unwrap();
    assert_eq!(ctx.allocator_metrics().retired, 1);
    assert_eq!(ctx.values().done_members().unwrap(), vec![0]);
    assert_membership(&ctx);
}

#[test]
fn test_one_alloc_retires_every_stripe_below_discard() {
    let config = config(100, 0, 768, 3, 2);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);

    // leave each of the three stripes with 48 free bytes
    let loose = ShmConfig {
        values: ValueAllocatorConfig {
            discard_memory_size: 0,
            ..config.values
        },
        ..config
    };
    let mut filler = ShmContext::create(heap.attach(), &loose, &clock).unwrap();
    let mut index = LocalIndex::new();
    for (stripe, key) in [b"s0", b"s1", b"s2"].iter().enumerate() {
        let value = filler.alloc(208, &mut index).unwrap();
        assert_eq!(value.index, stripe as u32);
        index.insert(*key, value);
    }
    for stripe in 0..3 {
        assert_eq!(filler.values().allocator(stripe).unwrap().free_size(), 48);
    }
    assert_eq!(filler.values().doing_members().unwrap(), vec![0, 1, 2]);

    // a single strict request walks past and retires all three
    let mut ctx = ShmContext::attach(heap.attach(), config.values, &clock).unwrap();
    let value = ctx.alloc(64, &mut index).unwrap();
    assert_eq!(value.index, 3);
    assert_eq!(ctx.values().done_members().unwrap(), vec![0, 1, 2]);
    assert_eq!(ctx.values().doing_members().unwrap(), vec![3, 4, 5]);
    assert_eq!(ctx.allocator_metrics().retired, 3);
    assert_eq!(ctx.allocator_metrics().grows, 1);
    assert_membership(&ctx);
}

#[test]
fn test_repeated_failures_retire_stripe() {
    let mut config = config(8, 0, 512, 1, 1);
    config.values.max_fail_times = 2;
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    ctx.alloc(256, &mut index).unwrap();
    // 256 bytes left is far above the discard size; only failures count
    for attempt in 1..=3u32 {
        assert_eq!(ctx.alloc(300, &mut index), Err(ShmError::OutOfMemory));
        assert_eq!(ctx.values().allocator(0).unwrap().fail_times, attempt);
    }
    assert_eq!(ctx.values().pool_of(0).unwrap(), PoolKind::Done);
    assert_eq!(ctx.allocator_metrics().retired, 1);
    assert_eq!(ctx.allocator_metrics().core.failures, 3);
    assert_membership(&ctx);
}

// ============================================================================
// GROW VERSUS RECYCLE
// ============================================================================

#[test]
fn test_without_ttl_grows_to_limit_then_recycles() {
    let config = config(16, 0, 256, 1, 3);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    for (i, key) in [b"s0", b"s1", b"s2"].iter().enumerate() {
        let value = ctx.alloc(256, &mut index).unwrap();
        assert_eq!(value.index, i as u32);
        index.insert(*key, value);
        assert_eq!(ctx.segment_count().unwrap().current, i as u32 + 1);
        clock.advance(1_000);
    }
    assert_eq!(ctx.values().done_count().unwrap(), 3);
    assert_eq!(ctx.allocator_metrics().recycles, 0);

    // limit reached: the oldest key's stripe comes back
    let value = ctx.alloc(256, &mut index).unwrap();
    assert_eq!(value.index, 0);
    assert!(!index.contains(b"s0"));
    assert!(index.contains(b"s1"));
    assert_eq!(ctx.segment_count().unwrap().current, 3);
    assert_eq!(ctx.allocator_metrics().recycles, 1);
    assert_eq!(ctx.allocator_metrics().evictions, 1);
    assert_membership(&ctx);
}

#[test]
fn test_ttl_prefers_recycling_stale_stripe() {
    let config = config(16, 60, 256, 1, 4);
    let heap = heap_for(&config);
    let clock = ManualClock::new(100);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    let value = ctx.alloc(256, &mut index).unwrap();
    index.insert(b"old", value);

    // 30s later the retired stripe is still fresh: grow
    clock.set(130);
    let value = ctx.alloc(256, &mut index).unwrap();
    index.insert(b"newer", value);
    assert_eq!(value.index, 1);
    assert_eq!(ctx.segment_count().unwrap().current, 2);

    // 100s after its first allocation stripe 0 is stale: recycle
    clock.set(200);
    let value = ctx.alloc(256, &mut index).unwrap();
    assert_eq!(value.index, 0);
    assert_eq!(ctx.segment_count().unwrap().current, 2);
    assert!(!index.contains(b"old"));
    assert!(index.contains(b"newer"));
    assert_eq!(ctx.values().allocator(0).unwrap().first_alloc_time, 200);
    assert_membership(&ctx);
}

#[test]
fn test_stripes_smaller_than_discard_migrate_then_recycle() {
    // 128-byte stripes and a 128-byte discard: every success retires its stripe
    let config = config(128, 0, 512, 4, 2);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    for i in 0..8u32 {
        let value = ctx.alloc(8, &mut index).unwrap();
        assert_eq!(value.index, i);
        index.insert(&i.to_le_bytes(), value);
        assert_eq!(ctx.values().pool_of(i).unwrap(), PoolKind::Done);
        assert_membership(&ctx);
    }
    assert_eq!(ctx.allocator_metrics().grows, 2);
    assert_eq!(ctx.values().doing_count().unwrap(), 0);

    let value = ctx.alloc(8, &mut index).unwrap();
    assert_eq!(value.index, 0);
    assert_eq!(ctx.allocator_metrics().revived, 1);
    // the revived stripe is retired again by the allocation it served
    assert_eq!(ctx.values().pool_of(0).unwrap(), PoolKind::Done);
    assert_eq!(ctx.allocator_metrics().retired, 9);
    assert_membership(&ctx);
}

#[test]
fn test_free_keeps_membership() {
    let config = config(16, 0, 256, 1, 1);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    let value = ctx.alloc(256, &mut index).unwrap();
    assert_eq!(ctx.values().pool_of(0).unwrap(), PoolKind::Done);
    ctx.free(&value).unwrap();
    assert_eq!(ctx.values().pool_of(0).unwrap(), PoolKind::Done);
    assert_eq!(ctx.values().allocator(0).unwrap().used(), 0);
    assert_membership(&ctx);
}

// ============================================================================
// FAILURES
// ============================================================================

/// Offers one eviction candidate whose key cannot be deleted.
struct BrokenIndex;

impl HashTable for BrokenIndex {
    fn delete(&mut self, key: &[u8]) -> Result<ShmValue, ShmError> {
        Err(ShmError::NotFound(key.len() as i64))
    }
}

impl EvictionList for BrokenIndex {
    fn first(&self) -> Option<EvictionEntry> {
        Some(EvictionEntry {
            offset: 77,
            key: b"ghost".to_vec(),
            allocator: 0,
        })
    }
}

#[test]
fn test_hash_delete_failure_is_consistency_fault() {
    let config = config(16, 0, 256, 1, 1);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = BrokenIndex;

    ctx.alloc(256, &mut index).unwrap();
    let err = ctx.alloc(8, &mut index).unwrap_err();
    assert_eq!(
        err,
        ShmError::ConsistencyFault(Fault::HashDelete {
            entry: 77,
            allocator: 0
        })
    );
    assert!(err.is_fatal());
}

#[test]
fn test_out_of_memory_when_nothing_to_evict() {
    let config = config(16, 0, 256, 1, 1);
    let heap = heap_for(&config);
    let clock = ManualClock::new(10);
    let mut ctx = ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let mut index = LocalIndex::new();

    ctx.alloc(256, &mut index).unwrap();
    assert_eq!(ctx.alloc(64, &mut index), Err(ShmError::OutOfMemory));
    assert_eq!(ctx.allocator_metrics().recycle_failures, 1);
}
