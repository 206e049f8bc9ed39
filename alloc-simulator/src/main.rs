use alloc_simulator::models::{SimulationConfig, WorkloadConfig};
use alloc_simulator::runner::SimulationRunner;
use alloc_simulator::stats::SimulationStats;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Shared value memory allocator simulator CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Bytes per value segment
    #[arg(long, default_value = "1048576")]
    segment_size: u64,

    /// Striping allocators carved out of each segment
    #[arg(long, default_value = "16")]
    stripes: u32,

    /// Maximum number of value segments
    #[arg(long, default_value = "32")]
    segments: u32,

    /// Free bytes below which a stripe is retired
    #[arg(long, default_value = "256")]
    discard: u64,

    /// Failed allocations tolerated before a stripe is retired
    #[arg(long, default_value = "8")]
    max_fail_times: u32,

    /// Stripes older than this (seconds) are recycled before growing; 0 disables
    #[arg(long, default_value = "0")]
    avg_key_ttl: u64,

    /// Number of requests to replay
    #[arg(long, default_value = "1000000")]
    requests: usize,

    /// Number of unique keys
    #[arg(long, default_value = "100000")]
    keys: u64,

    /// Percentage of traffic from popular keys
    #[arg(long, default_value = "80")]
    popular_traffic: u8,

    /// Percentage of keys that are popular
    #[arg(long, default_value = "20")]
    popular_keys: u8,

    /// Minimum value size in bytes
    #[arg(long, default_value = "64")]
    min_size: u32,

    /// Maximum value size in bytes
    #[arg(long, default_value = "4096")]
    max_size: u32,

    /// Requests per simulated second
    #[arg(long, default_value = "1000")]
    rps: u32,

    /// Seed for the request generator
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Worker threads, each with its own attachment
    #[arg(long, default_value = "1")]
    threads: usize,

    /// Export results to CSV file
    #[arg(long, value_name = "PATH")]
    output_csv: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(level: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = SimulationConfig {
        shm: SimulationConfig::shm_config(
            args.segment_size,
            args.stripes,
            args.segments,
            args.discard,
            args.max_fail_times,
            args.avg_key_ttl,
        ),
        workload: WorkloadConfig {
            requests: args.requests,
            keys: args.keys,
            popular_traffic_percent: args.popular_traffic,
            popular_keys_percent: args.popular_keys,
            min_size: args.min_size,
            max_size: args.max_size,
            rps: args.rps,
            seed: args.seed,
        },
        threads: args.threads,
        output_csv: args.output_csv,
    };
    config.shm.validate()?;
    info!(config = ?config.shm, threads = config.threads, "starting simulation");

    let result = SimulationRunner::new(config.clone()).run()?;
    let stats = SimulationStats::from_result(&result);
    stats.print_summary();

    if let Some(path) = &config.output_csv {
        stats.export_csv(path)?;
        info!(path = %path.display(), "results written");
    }

    Ok(())
}
