// Simulation runner: replays a workload through shared value memory

use crate::models::{Request, SimulationConfig, SimulationResult, WorkerResult};
use crate::workload::WorkloadGenerator;
use shmcache_alloc::clock::{Clock, ManualClock};
use shmcache_alloc::metrics::AllocMetrics;
use shmcache_alloc::{CacheLock, HeapRegion, LocalIndex, ShmContext, ShmError};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

pub type SimError = Box<dyn std::error::Error + Send + Sync>;

/// Runs one simulation described by a [`SimulationConfig`]
#[derive(Debug)]
pub struct SimulationRunner {
    config: SimulationConfig,
}

impl SimulationRunner {
    pub fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Replays the workload and collects per-worker results
    ///
    /// Requests are dealt round-robin to the workers. Every worker attaches
    /// its own context to the shared region and does all index and allocator
    /// work inside one critical section per request.
    pub fn run(&self) -> Result<SimulationResult, SimError> {
        let threads = self.config.threads.max(1);
        let shm = self.config.shm;
        let region_bytes = ShmContext::<&ManualClock>::region_size(&shm)?;
        info!(region_bytes, threads, "creating shared value memory");

        let clock = ManualClock::new(1);
        let heap = HeapRegion::new(region_bytes);
        let owner = ShmContext::create(heap.attach(), &shm, &clock)?;
        let lock = CacheLock::new(LocalIndex::new());

        let mut queues: Vec<Vec<Request>> = vec![Vec::new(); threads];
        for (i, request) in WorkloadGenerator::new(self.config.workload.clone()).enumerate() {
            queues[i % threads].push(request);
        }

        let shared = heap.handle();
        let start = Instant::now();
        let workers = thread::scope(|scope| {
            let handles: Vec<_> = queues
                .into_iter()
                .enumerate()
                .map(|(worker, requests)| {
                    let (lock, clock) = (&lock, &clock);
                    scope.spawn(move || {
                        let mut ctx = {
                            let _section = lock.enter();
                            // SAFETY: run_worker only touches the region while
                            // holding `lock`.
                            let region = unsafe { shared.attach() };
                            ShmContext::attach(region, shm.values, clock)?
                        };
                        run_worker(worker, &mut ctx, lock, clock, &requests)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .map_err(|_| SimError::from("worker thread panicked"))?
                })
                .collect::<Result<Vec<_>, SimError>>()
        })?;
        let duration = start.elapsed();

        let count = owner.segment_count()?;
        let live_keys = lock.into_inner().len();
        info!(
            live_keys,
            segments = count.current,
            elapsed_ms = duration.as_millis() as u64,
            "simulation finished"
        );

        Ok(SimulationResult {
            workers,
            live_keys,
            segments: count.current,
            max_segments: count.max,
            region_bytes,
            duration,
        })
    }
}

/// Serves `requests` as get-or-set operations
fn run_worker(
    worker: usize,
    ctx: &mut ShmContext<'_, &ManualClock>,
    lock: &CacheLock<LocalIndex>,
    clock: &ManualClock,
    requests: &[Request],
) -> Result<WorkerResult, SimError> {
    let mut result = WorkerResult::default();
    let mut buf = Vec::new();

    for request in requests {
        let key = request.key.to_le_bytes();
        let fill = fill_byte(request.key);
        let mut index = lock.enter();

        // workers interleave, so only ever move the shared clock forward
        if request.time + 1 > clock.now() {
            clock.set(request.time + 1);
        }

        if let Some(&value) = index.get(&key) {
            buf.resize(value.size as usize, 0);
            let len = ctx.read_value(&value, &mut buf)?;
            if buf[..len].iter().any(|&b| b != fill) {
                return Err(format!("key {} read back corrupted bytes", request.key).into());
            }
            index.touch(&key);
            result.hits += 1;
            continue;
        }

        result.misses += 1;
        match ctx.alloc(request.size, &mut *index) {
            Ok(value) => {
                buf.clear();
                buf.resize(request.size as usize, fill);
                ctx.write_value(&value, &buf)?;
                if let Some(old) = index.insert(&key, value) {
                    ctx.free(&old)?;
                }
            }
            Err(ShmError::OutOfMemory) => {
                result.alloc_errors += 1;
                debug!(worker, size = request.size, "allocation failed");
            }
            Err(err) => {
                warn!(worker, error = %err, "allocator fault");
                return Err(err.into());
            }
        }
    }

    result.metrics = {
        let _section = lock.enter();
        ctx.metrics()
    };
    debug!(
        worker,
        hits = result.hits,
        misses = result.misses,
        "worker finished"
    );
    Ok(result)
}

fn fill_byte(key: u64) -> u8 {
    (key % 251) as u8 + 1
}
