// Data models for allocator simulation

use serde::Serialize;
use shmcache_alloc::config::{SegmentConfig, ShmConfig, ValueAllocatorConfig};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// A single get-or-set request against the simulated cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    /// Seconds since the start of the run
    pub time: u64,
    /// Cache key
    pub key: u64,
    /// Value size in bytes
    pub size: u32,
}

/// Shape of the synthetic traffic
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of requests
    pub requests: usize,
    /// Number of unique keys
    pub keys: u64,
    /// Percentage of requests that hit the popular keys
    pub popular_traffic_percent: u8,
    /// Percentage of keys that are popular
    pub popular_keys_percent: u8,
    /// Smallest value size in bytes
    pub min_size: u32,
    /// Largest value size in bytes
    pub max_size: u32,
    /// Requests per simulated second
    pub rps: u32,
    /// Seed for the request generator
    pub seed: u64,
}

/// Everything a simulation run needs
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Allocator layout and policy
    pub shm: ShmConfig,
    /// Traffic to replay
    pub workload: WorkloadConfig,
    /// Worker threads, each with its own attachment
    pub threads: usize,
    /// Optional CSV output
    pub output_csv: Option<PathBuf>,
}

impl SimulationConfig {
    /// Builds the allocator configuration from CLI-sized pieces
    pub fn shm_config(
        segment_size: u64,
        stripes: u32,
        max_segments: u32,
        discard: u64,
        max_fail_times: u32,
        avg_key_ttl: u64,
    ) -> ShmConfig {
        ShmConfig {
            values: ValueAllocatorConfig {
                discard_memory_size: discard,
                max_fail_times,
                avg_key_ttl,
            },
            segments: SegmentConfig {
                segment_size,
                stripes_per_segment: stripes,
                max_segments,
            },
        }
    }
}

/// Per-worker outcome
#[derive(Debug, Clone, Default)]
pub struct WorkerResult {
    /// Requests served from an existing value
    pub hits: usize,
    /// Requests that had to allocate
    pub misses: usize,
    /// Allocations that failed
    pub alloc_errors: usize,
    /// Allocator metrics of this worker's attachment
    pub metrics: BTreeMap<String, f64>,
}

/// Outcome of a whole simulation run
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// One entry per worker thread
    pub workers: Vec<WorkerResult>,
    /// Keys still cached at the end
    pub live_keys: usize,
    /// Value segments in use at the end
    pub segments: u32,
    /// Segment limit
    pub max_segments: u32,
    /// Region size in bytes
    pub region_bytes: usize,
    /// Wall-clock duration
    pub duration: Duration,
}

/// One CSV row per worker plus a totals row
#[derive(Debug, Clone, Serialize)]
pub struct CsvResultRow {
    pub worker: String,
    pub hits: usize,
    pub misses: usize,
    pub hit_rate: f64,
    pub alloc_errors: usize,
    pub successes: f64,
    pub failures: f64,
    pub bytes_allocated: f64,
    pub bytes_freed: f64,
    pub retired: f64,
    pub revived: f64,
    pub recycles: f64,
    pub evictions: f64,
    pub grows: f64,
    pub retries: f64,
}
