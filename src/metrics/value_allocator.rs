//! Value Allocator Metrics
//!
//! Adds the retire/recycle/grow counters of the value allocator's policy loop
//! to the core counters.

extern crate alloc;

use super::{AllocMetrics, CoreAllocMetrics};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

/// Value allocator metrics (extends CoreAllocMetrics).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ValueAllocatorMetrics {
    /// Core counters.
    pub core: CoreAllocMetrics,

    /// Stripes moved from doing to done.
    pub retired: u64,

    /// Stripes moved from done back to doing.
    pub revived: u64,

    /// Recycle passes that freed a stripe.
    pub recycles: u64,

    /// Recycle passes that ran out of eviction candidates.
    pub recycle_failures: u64,

    /// Keys evicted by recycling.
    pub evictions: u64,

    /// Segments created to satisfy a miss.
    pub grows: u64,

    /// Allocations that only succeeded on the retry after recycle or grow.
    pub retries: u64,
}

impl ValueAllocatorMetrics {
    /// Converts the metrics to a BTreeMap for reporting.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.to_btreemap();

        metrics.insert("retired".to_string(), self.retired as f64);
        metrics.insert("revived".to_string(), self.revived as f64);
        metrics.insert("recycles".to_string(), self.recycles as f64);
        metrics.insert(
            "recycle_failures".to_string(),
            self.recycle_failures as f64,
        );
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("grows".to_string(), self.grows as f64);
        metrics.insert("retries".to_string(), self.retries as f64);

        if self.recycles > 0 {
            metrics.insert(
                "evictions_per_recycle".to_string(),
                self.evictions as f64 / self.recycles as f64,
            );
        }

        metrics
    }
}

impl AllocMetrics for ValueAllocatorMetrics {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.to_btreemap()
    }

    fn component_name(&self) -> &'static str {
        "ValueAllocator"
    }
}
