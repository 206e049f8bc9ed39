//! Cache Lock Benchmarks
//!
//! Measures allocation throughput when several threads, each with its own
//! attachment, contend for the single cache lock.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shmcache_alloc::clock::ManualClock;
use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
use shmcache_alloc::{CacheLock, HeapRegion, LocalIndex, RegionHandle, ShmContext};
use std::thread;

const OPS_PER_THREAD: usize = 1_000;
const KEYS_PER_THREAD: u64 = 256;

fn bench_config() -> ShmConfig {
    ShmConfig {
        values: ValueAllocatorConfig {
            discard_memory_size: 128,
            max_fail_times: 8,
            avg_key_ttl: 0,
        },
        segments: SegmentConfig {
            segment_size: 256 * 1024,
            stripes_per_segment: 32,
            max_segments: 16,
        },
    }
}

fn run_contended_writes(
    shared: RegionHandle<'_>,
    lock: &CacheLock<LocalIndex>,
    config: &ShmConfig,
    clock: &ManualClock,
    threads: usize,
) {
    thread::scope(|scope| {
        for t in 0..threads {
            scope.spawn(move || {
                let mut ctx = {
                    let _section = lock.enter();
                    // SAFETY: the attachment is only used under `lock`.
                    let region = unsafe { shared.attach() };
                    ShmContext::attach(region, config.values, clock).unwrap()
                };
                for op in 0..OPS_PER_THREAD {
                    let key = (t as u64) << 32 | (op as u64 % KEYS_PER_THREAD);
                    let mut index = lock.enter();
                    let value = ctx.alloc(black_box(96), &mut *index).unwrap();
                    if let Some(old) = index.insert(&key.to_le_bytes(), value) {
                        ctx.free(&old).unwrap();
                    }
                }
            });
        }
    });
}

fn contended_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("Contended Writes");
    let config = bench_config();
    let clock = ManualClock::new(1);
    let heap = HeapRegion::new(ShmContext::<&ManualClock>::region_size(&config).unwrap());
    ShmContext::create(heap.attach(), &config, &clock).unwrap();
    let lock = CacheLock::new(LocalIndex::new());

    for threads in [1usize, 2, 4, 8] {
        group.throughput(Throughput::Elements((threads * OPS_PER_THREAD) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            b.iter(|| run_contended_writes(heap.handle(), &lock, &config, &clock, threads));
        });
    }

    group.finish();
}

fn lock_overhead(c: &mut Criterion) {
    let lock = CacheLock::new(0u64);
    c.bench_function("CacheLock enter", |b| {
        b.iter(|| {
            let mut section = lock.enter();
            *section = black_box(*section + 1);
        });
    });
}

criterion_group!(benches, contended_writes, lock_overhead);
criterion_main!(benches);
