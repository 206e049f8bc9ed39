// Statistics reporting for allocator simulation

use crate::models::{CsvResultRow, SimulationResult, WorkerResult};
use std::collections::BTreeMap;
use std::path::Path;

/// Summarises a finished [`SimulationResult`]
#[derive(Debug)]
pub struct SimulationStats<'a> {
    result: &'a SimulationResult,
    totals: WorkerResult,
}

impl<'a> SimulationStats<'a> {
    /// Folds the per-worker counters into a totals row
    pub fn from_result(result: &'a SimulationResult) -> Self {
        let mut totals = WorkerResult::default();
        for worker in &result.workers {
            totals.hits += worker.hits;
            totals.misses += worker.misses;
            totals.alloc_errors += worker.alloc_errors;
            for (name, value) in &worker.metrics {
                // gauges describe the shared region, not the worker
                if is_gauge(name) {
                    totals.metrics.insert(name.clone(), *value);
                } else {
                    *totals.metrics.entry(name.clone()).or_insert(0.0) += value;
                }
            }
        }
        Self { result, totals }
    }

    /// Combined counters of all workers
    pub fn totals(&self) -> &WorkerResult {
        &self.totals
    }

    /// Print a human readable summary
    pub fn print_summary(&self) {
        let result = self.result;
        println!("\nAllocator Simulation Summary");
        println!("============================");
        println!(
            "Region: {} bytes, segments {}/{}",
            result.region_bytes, result.segments, result.max_segments
        );
        println!("Workers: {}", result.workers.len());
        println!("Live keys: {}", result.live_keys);
        println!("Elapsed: {:.2?}", result.duration);

        println!(
            "\n{:<8} {:>10} {:>10} {:>9} {:>8} {:>8} {:>10} {:>10}",
            "Worker", "Hits", "Misses", "Hit Rate", "Errors", "Grows", "Recycles", "Evictions"
        );
        println!("{}", "-".repeat(80));
        for (i, worker) in result.workers.iter().enumerate() {
            print_row(&i.to_string(), worker);
        }
        println!("{}", "-".repeat(80));
        print_row("total", &self.totals);

        println!("\nAllocator metrics (all workers):");
        for (name, value) in &self.totals.metrics {
            println!("  {:<24} {:>14.2}", name, value);
        }
    }

    /// Export one row per worker plus a totals row to a CSV file
    pub fn export_csv(&self, path: &Path) -> Result<(), csv::Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for (i, worker) in self.result.workers.iter().enumerate() {
            writer.serialize(csv_row(i.to_string(), worker))?;
        }
        writer.serialize(csv_row("total".to_string(), &self.totals))?;
        writer.flush()?;
        Ok(())
    }
}

fn is_gauge(name: &str) -> bool {
    matches!(name, "segments" | "max_segments" | "free_bytes")
}

fn hit_rate(worker: &WorkerResult) -> f64 {
    let total = worker.hits + worker.misses;
    if total > 0 {
        worker.hits as f64 / total as f64
    } else {
        0.0
    }
}

fn metric(metrics: &BTreeMap<String, f64>, name: &str) -> f64 {
    metrics.get(name).copied().unwrap_or(0.0)
}

fn print_row(label: &str, worker: &WorkerResult) {
    println!(
        "{:<8} {:>10} {:>10} {:>8.2}% {:>8} {:>8} {:>10} {:>10}",
        label,
        worker.hits,
        worker.misses,
        hit_rate(worker) * 100.0,
        worker.alloc_errors,
        metric(&worker.metrics, "grows"),
        metric(&worker.metrics, "recycles"),
        metric(&worker.metrics, "evictions"),
    );
}

fn csv_row(worker_label: String, worker: &WorkerResult) -> CsvResultRow {
    let m = &worker.metrics;
    CsvResultRow {
        worker: worker_label,
        hits: worker.hits,
        misses: worker.misses,
        hit_rate: hit_rate(worker),
        alloc_errors: worker.alloc_errors,
        successes: metric(m, "successes"),
        failures: metric(m, "failures"),
        bytes_allocated: metric(m, "bytes_allocated"),
        bytes_freed: metric(m, "bytes_freed"),
        retired: metric(m, "retired"),
        revived: metric(m, "revived"),
        recycles: metric(m, "recycles"),
        evictions: metric(m, "evictions"),
        grows: metric(m, "grows"),
        retries: metric(m, "retries"),
    }
}
