//! Allocator Metrics System
//!
//! Counters describing how the value allocator is being driven, reported as
//! a BTreeMap so that output order is deterministic across runs.
//!
//! Metrics are process-local: each attachment counts the operations it
//! performed itself. They are not stored in the shared region.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

pub mod value_allocator;

pub use value_allocator::ValueAllocatorMetrics;

/// Counters common to every allocator front end.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoreAllocMetrics {
    /// Allocation requests received.
    pub requests: u64,

    /// Requests that returned a value.
    pub successes: u64,

    /// Requests that ended in an error.
    pub failures: u64,

    /// Bytes requested by successful allocations.
    pub bytes_allocated: u64,

    /// Bytes returned through `free`.
    pub bytes_freed: u64,
}

impl CoreAllocMetrics {
    /// Records a successful allocation of `size` bytes.
    pub fn record_success(&mut self, size: u64) {
        self.requests += 1;
        self.successes += 1;
        self.bytes_allocated += size;
    }

    /// Records a failed allocation.
    pub fn record_failure(&mut self) {
        self.requests += 1;
        self.failures += 1;
    }

    /// Records `size` bytes freed.
    pub fn record_free(&mut self, size: u64) {
        self.bytes_freed += size;
    }

    /// Bytes allocated and not yet freed by this process.
    pub fn bytes_outstanding(&self) -> u64 {
        self.bytes_allocated.saturating_sub(self.bytes_freed)
    }

    /// Fraction of requests that failed, or 0.0 before the first request.
    pub fn failure_rate(&self) -> f64 {
        if self.requests > 0 {
            self.failures as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert("successes".to_string(), self.successes as f64);
        metrics.insert("failures".to_string(), self.failures as f64);
        metrics.insert("failure_rate".to_string(), self.failure_rate());

        metrics.insert("bytes_allocated".to_string(), self.bytes_allocated as f64);
        metrics.insert("bytes_freed".to_string(), self.bytes_freed as f64);
        metrics.insert(
            "bytes_outstanding".to_string(),
            self.bytes_outstanding() as f64,
        );

        if self.successes > 0 {
            metrics.insert(
                "avg_value_size".to_string(),
                self.bytes_allocated as f64 / self.successes as f64,
            );
        }

        metrics
    }
}

/// Uniform metrics reporting.
pub trait AllocMetrics {
    /// All metrics as key-value pairs, keys sorted.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Name of the reporting component.
    fn component_name(&self) -> &'static str;
}
