use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use fine_locks::workload::{self, Workload};
use fine_locks::{ClhLock, FutexLock, TatasLock};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LockKind {
    Spin,
    Clh,
    Futex,
}

/// Hammer a fine-grained sorted list from many threads, then check its invariants.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    #[arg(short, long, default_value_t = 8)]
    threads: usize,

    /// Operations per thread
    #[arg(short, long, default_value_t = 10_000)]
    ops: usize,

    /// Keys are drawn from 0..KEYS
    #[arg(short, long, default_value_t = 100)]
    keys: u64,

    #[arg(long, default_value_t = 0.5)]
    insert_ratio: f64,

    #[arg(long, default_value_t = 0.3)]
    remove_ratio: f64,

    /// Per-node lock
    #[arg(short, long, value_enum, default_value_t = LockKind::Spin)]
    lock: LockKind,

    #[arg(long, default_value_t = 0)]
    seed: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let workload = Workload {
        threads: args.threads,
        ops_per_thread: args.ops,
        key_range: args.keys,
        insert_ratio: args.insert_ratio,
        remove_ratio: args.remove_ratio,
        seed: args.seed,
    };

    let report = match args.lock {
        LockKind::Spin => workload::run::<TatasLock>(&workload),
        LockKind::Clh => workload::run::<ClhLock>(&workload),
        LockKind::Futex => workload::run::<FutexLock>(&workload),
    }?;
    report
        .verify()
        .with_context(|| format!("{:?} list broke an invariant", args.lock))?;

    println!(
        "{} ops in {:.3}s ({:.0} ops/s), final length {}",
        report.ops.total(),
        report.elapsed.as_secs_f64(),
        report.throughput(),
        report.len,
    );
    Ok(())
}
