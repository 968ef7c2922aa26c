mod args;
mod database;
mod metrics;
mod workload;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::task;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use anonymbe_bench::{Binding, Db, Operation, Properties, Record};

use crate::args::Args;
use crate::database::Database;
use crate::metrics::{ConcurrentMetrics, Metrics, OperationReport};
use crate::workload::{
    build_record, build_update, key_for, scan_length, KeyChooser, Phase, Step, WorkloadConfig,
    WorkloadType,
};

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let properties = load_properties(&args)?;
    let runtime = configure_runtime(&args)?;
    runtime.block_on(run_bench(&args, properties))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn configure_runtime(args: &Args) -> Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.worker_threads(args.worker_threads.unwrap_or_else(num_cpus::get).max(1));
    builder
        .enable_all()
        .build()
        .context("failed to build tokio runtime")
}

fn load_properties(args: &Args) -> Result<Properties> {
    let mut properties = match &args.properties_file {
        Some(path) => Properties::load(path)
            .with_context(|| format!("failed to load properties from {}", path.display()))?,
        None => Properties::new(),
    };
    for assignment in &args.properties {
        properties
            .apply_assignment(assignment)
            .with_context(|| format!("bad property override {assignment:?}"))?;
    }
    Ok(properties)
}

fn create_workload_config(args: &Args) -> WorkloadConfig {
    WorkloadConfig {
        workload: args.workload,
        table: args.table.clone(),
        record_count: args.record_count,
        operation_count: args.operation_count,
        field_count: args.field_count,
        field_length: args.field_length,
        max_scan_length: args.max_scan_length,
        distribution: args.distribution(),
    }
}

#[derive(Serialize)]
struct Report {
    database: String,
    workload: WorkloadType,
    phase: Phase,
    threads: usize,
    finished_at: DateTime<Utc>,
    runtime_ms: u128,
    throughput_ops_sec: f64,
    failed_workers: u64,
    operations: Vec<OperationReport>,
}

async fn run_bench(args: &Args, properties: Properties) -> Result<()> {
    let binding = args.database.binding(properties)?;
    let config = Arc::new(create_workload_config(args));
    let threads = args.threads();

    // The in-process store starts empty every time, so a run needs a load first.
    if args.database == Database::Memory && args.phase == Phase::Run {
        info!("memory store is not persistent; loading records before the run");
        run_phase(&binding, &config, Phase::Load, threads).await?;
    }

    info!(
        database = binding.name(),
        workload = ?config.workload,
        phase = ?args.phase,
        threads,
        "starting benchmark"
    );
    let start = Instant::now();
    let metrics = run_phase(&binding, &config, args.phase, threads).await?;
    let elapsed = start.elapsed();
    binding.shutdown().await;

    if args.json {
        let report = Report {
            database: binding.name().to_string(),
            workload: config.workload,
            phase: args.phase,
            threads,
            finished_at: Utc::now(),
            runtime_ms: elapsed.as_millis(),
            throughput_ops_sec: metrics.total_operations() as f64 / elapsed.as_secs_f64(),
            failed_workers: metrics.failed_workers(),
            operations: metrics.reports(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\nBenchmark Complete");
        println!("Total Operations: {}", metrics.total_operations());
        println!(
            "Throughput: {:.2} ops/sec",
            metrics.total_operations() as f64 / elapsed.as_secs_f64()
        );
        println!("{}", metrics);
    }
    Ok(())
}

async fn run_phase(
    binding: &Arc<dyn Binding>,
    config: &Arc<WorkloadConfig>,
    phase: Phase,
    threads: usize,
) -> Result<Metrics> {
    let metrics = ConcurrentMetrics::default();
    let inserted = Arc::new(AtomicU64::new(config.record_count));

    let mut handles = Vec::with_capacity(threads);
    for worker in 0..threads {
        let db = binding.new_db();
        let config = config.clone();
        let metrics = metrics.clone();
        let inserted = inserted.clone();
        handles.push(task::spawn(async move {
            run_worker(db, worker, threads, &config, phase, &inserted, &metrics).await
        }));
    }
    for handle in handles {
        handle.await.context("worker task panicked")?;
    }
    Ok(metrics.get_metrics().await)
}

async fn run_worker(
    mut db: Box<dyn Db>,
    worker: usize,
    threads: usize,
    config: &WorkloadConfig,
    phase: Phase,
    inserted: &AtomicU64,
    metrics: &ConcurrentMetrics,
) {
    if let Err(err) = db.init().await {
        error!(worker, status = %err.status(), error = %err, "worker failed to initialise");
        metrics.record_failed_worker().await;
        if let Err(err) = db.cleanup().await {
            warn!(worker, error = %err, "cleanup after failed init also failed");
        }
        return;
    }

    let mut local = Metrics::default();
    let mut rng = StdRng::from_entropy();
    match phase {
        Phase::Load => {
            for index in (worker as u64..config.record_count).step_by(threads) {
                let record = build_record(&mut rng, config.field_count, config.field_length);
                let start = Instant::now();
                let status = db.insert(&config.table, &key_for(index), &record).await;
                local.record(Operation::Insert, status, start.elapsed());
            }
        }
        Phase::Run => {
            let share = config.operation_count / threads as u64
                + u64::from((worker as u64) < config.operation_count % threads as u64);
            let proportions = config.workload.proportions();
            let chooser = KeyChooser::new(config.distribution, config.record_count);
            for _ in 0..share {
                let step = proportions.choose(&mut rng);
                let existing = || inserted.load(Ordering::Relaxed);
                let next_key = |rng: &mut StdRng| key_for(chooser.next_index(rng, existing()));
                match step {
                    Step::Read => {
                        let key = next_key(&mut rng);
                        read(&mut *db, config, &key, &mut local).await;
                    }
                    Step::ReadModifyWrite => {
                        let key = next_key(&mut rng);
                        read(&mut *db, config, &key, &mut local).await;
                        let values = build_update(&mut rng, config.field_count, config.field_length);
                        let start = Instant::now();
                        let status = db.update(&config.table, &key, &values).await;
                        local.record(Operation::Update, status, start.elapsed());
                    }
                    Step::Update => {
                        let key = next_key(&mut rng);
                        let values = build_update(&mut rng, config.field_count, config.field_length);
                        let start = Instant::now();
                        let status = db.update(&config.table, &key, &values).await;
                        local.record(Operation::Update, status, start.elapsed());
                    }
                    Step::Insert => {
                        let key = key_for(inserted.fetch_add(1, Ordering::Relaxed));
                        let record = build_record(&mut rng, config.field_count, config.field_length);
                        let start = Instant::now();
                        let status = db.insert(&config.table, &key, &record).await;
                        local.record(Operation::Insert, status, start.elapsed());
                    }
                    Step::Scan => {
                        let key = next_key(&mut rng);
                        let count = scan_length(&mut rng, config.max_scan_length);
                        let mut out = Vec::with_capacity(count);
                        let start = Instant::now();
                        let status = db.scan(&config.table, &key, count, None, &mut out).await;
                        local.record(Operation::Scan, status, start.elapsed());
                    }
                    Step::Delete => {
                        let key = next_key(&mut rng);
                        let start = Instant::now();
                        let status = db.delete(&config.table, &key).await;
                        local.record(Operation::Delete, status, start.elapsed());
                    }
                }
            }
        }
    }

    if let Err(err) = db.cleanup().await {
        warn!(worker, status = %err.status(), error = %err, "worker cleanup failed");
    }
    metrics.merge(local).await;
}

async fn read(db: &mut dyn Db, config: &WorkloadConfig, key: &str, local: &mut Metrics) {
    let mut record = Record::new();
    let start = Instant::now();
    let status = db.read(&config.table, key, None, &mut record).await;
    local.record(Operation::Read, status, start.elapsed());
}
