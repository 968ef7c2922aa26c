use std::path::PathBuf;

use clap::Parser;

use crate::database::Database;
use crate::workload::{Phase, RequestDistribution, WorkloadType};

#[derive(Parser, Debug)]
#[command(term_width = 0)]
pub struct Args {
    /// The database to benchmark
    #[arg(short, long, default_value = "memory")]
    pub database: Database,

    /// YCSB core workload
    #[arg(short, long, default_value = "a")]
    pub workload: WorkloadType,

    /// Load the initial records, or run the operation mix against them
    #[arg(long, default_value = "run")]
    pub phase: Phase,

    /// Number of concurrent workers (defaults to the CPU count)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Table the workload targets
    #[arg(long, default_value = "usertable")]
    pub table: String,

    /// Number of records to load initially
    #[arg(long, default_value = "1000")]
    pub record_count: u64,

    /// Number of operations to perform in the run phase
    #[arg(long, default_value = "1000")]
    pub operation_count: u64,

    /// Fields per record
    #[arg(long, default_value = "10")]
    pub field_count: usize,

    /// Bytes per field value
    #[arg(long, default_value = "100")]
    pub field_length: usize,

    /// Upper bound on the records a single scan asks for
    #[arg(long, default_value = "100")]
    pub max_scan_length: usize,

    /// How keys are picked (defaults to latest for workload D, zipfian otherwise)
    #[arg(long)]
    pub request_distribution: Option<RequestDistribution>,

    /// Adapter properties file (TOML)
    #[arg(short = 'P', long = "properties")]
    pub properties_file: Option<PathBuf>,

    /// Adapter property override, `key=value`; may be repeated
    #[arg(short = 'p', long = "property")]
    pub properties: Vec<String>,

    /// Print the results as JSON
    #[arg(long)]
    pub json: bool,

    /// Runtime worker threads (defaults to the CPU count)
    #[arg(long)]
    pub worker_threads: Option<usize>,
}

impl Args {
    pub fn threads(&self) -> usize {
        self.threads.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn distribution(&self) -> RequestDistribution {
        self.request_distribution
            .unwrap_or_else(|| self.workload.default_distribution())
    }
}
