use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;

use anonymbe_bench::{Operation, Status};

#[derive(Default, Clone)]
pub struct Metrics {
    latencies: BTreeMap<Operation, Vec<Duration>>,
    statuses: BTreeMap<Operation, BTreeMap<Status, u64>>,
    failed_workers: u64,
}

#[derive(Default, Clone)]
pub struct ConcurrentMetrics {
    metrics: Arc<Mutex<Metrics>>,
}

impl ConcurrentMetrics {
    pub async fn merge(&self, local: Metrics) {
        self.metrics.lock().await.merge(local);
    }

    pub async fn record_failed_worker(&self) {
        self.metrics.lock().await.failed_workers += 1;
    }

    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }
}

/// Latency summary for one operation, in microseconds.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    pub count: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub statuses: BTreeMap<Status, u64>,
}

impl Metrics {
    pub fn record(&mut self, op: Operation, status: Status, duration: Duration) {
        self.latencies.entry(op).or_default().push(duration);
        *self
            .statuses
            .entry(op)
            .or_default()
            .entry(status)
            .or_default() += 1;
    }

    pub fn merge(&mut self, other: Metrics) {
        for (op, mut latencies) in other.latencies {
            self.latencies.entry(op).or_default().append(&mut latencies);
        }
        for (op, counts) in other.statuses {
            let mine = self.statuses.entry(op).or_default();
            for (status, n) in counts {
                *mine.entry(status).or_default() += n;
            }
        }
        self.failed_workers += other.failed_workers;
    }

    pub fn failed_workers(&self) -> u64 {
        self.failed_workers
    }

    pub fn count(&self, op: Operation, status: Status) -> u64 {
        self.statuses
            .get(&op)
            .and_then(|counts| counts.get(&status))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_operations(&self) -> u64 {
        self.latencies.values().map(|l| l.len() as u64).sum()
    }

    pub fn reports(&self) -> Vec<OperationReport> {
        self.latencies
            .iter()
            .filter(|(_, latencies)| !latencies.is_empty())
            .map(|(op, latencies)| {
                let mut sorted = latencies.clone();
                sorted.sort_unstable();
                let count = sorted.len() as u64;
                let at = |pct: u64| sorted[((count - 1) * pct / 100) as usize].as_micros() as u64;
                OperationReport {
                    operation: *op,
                    count,
                    min_us: at(0),
                    max_us: at(100),
                    p50_us: at(50),
                    p95_us: at(95),
                    p99_us: at(99),
                    statuses: self.statuses.get(op).cloned().unwrap_or_default(),
                }
            })
            .collect()
    }

    fn format_duration(micros: u64) -> String {
        let nanos = micros as f64 * 1_000.0;
        if nanos < 1_000_000.0 {
            format!("{:.2} µs", nanos / 1_000.0)
        } else if nanos < 1_000_000_000.0 {
            format!("{:.2} ms", nanos / 1_000_000.0)
        } else {
            format!("{:.2} s", nanos / 1_000_000_000.0)
        }
    }
}

impl Display for Metrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\nDetailed Latency Statistics:")?;
        writeln!(
            f,
            "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12}",
            "Operation", "Count", "Min", "Max", "Median", "P95", "P99"
        )?;
        writeln!(f, "{:-<87}", "")?;
        for r in self.reports() {
            writeln!(
                f,
                "{:<15} {:<12} {:<12} {:<12} {:<12} {:<12} {:<12}",
                r.operation.as_str(),
                r.count,
                Self::format_duration(r.min_us),
                Self::format_duration(r.max_us),
                Self::format_duration(r.p50_us),
                Self::format_duration(r.p95_us),
                Self::format_duration(r.p99_us),
            )?;
        }

        writeln!(f, "\nStatus Counts:")?;
        write!(f, "{:<15}", "Operation")?;
        for status in Status::ALL {
            write!(f, " {:<20}", status.as_str())?;
        }
        writeln!(f)?;
        for op in self.statuses.keys() {
            write!(f, "{:<15}", op.as_str())?;
            for status in Status::ALL {
                write!(f, " {:<20}", self.count(*op, status))?;
            }
            writeln!(f)?;
        }
        if self.failed_workers > 0 {
            writeln!(f, "\nWorkers failed to initialise: {}", self.failed_workers)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_adds_counts_and_latencies() {
        let mut a = Metrics::default();
        a.record(Operation::Read, Status::Ok, Duration::from_micros(10));
        let mut b = Metrics::default();
        b.record(Operation::Read, Status::NotFound, Duration::from_micros(30));
        b.record(Operation::Read, Status::Ok, Duration::from_micros(20));
        a.merge(b);

        assert_eq!(a.total_operations(), 3);
        assert_eq!(a.count(Operation::Read, Status::Ok), 2);
        assert_eq!(a.count(Operation::Read, Status::NotFound), 1);
        assert_eq!(a.count(Operation::Scan, Status::Ok), 0);

        let report = &a.reports()[0];
        assert_eq!((report.min_us, report.p50_us, report.max_us), (10, 20, 30));
    }

    #[test]
    fn status_table_lists_every_status_per_operation() {
        let mut m = Metrics::default();
        m.record(Operation::Update, Status::Ok, Duration::from_micros(5));
        m.record(Operation::Update, Status::NotFound, Duration::from_micros(5));
        m.record(Operation::Update, Status::NotFound, Duration::from_micros(5));

        let text = m.to_string();
        let header = text.lines().find(|l| l.starts_with("Operation") && l.contains("NOT_FOUND"));
        assert!(header.is_some(), "{text}");
        let row: Vec<&str> = text
            .lines()
            .rev()
            .find(|l| l.starts_with("update"))
            .unwrap()
            .split_whitespace()
            .collect();
        assert_eq!(row, vec!["update", "1", "2", "0", "0", "0"]);
    }

    #[test]
    fn report_serializes_statuses_by_name() {
        let mut m = Metrics::default();
        m.record(Operation::Delete, Status::NotFound, Duration::from_micros(1));
        let json = serde_json::to_value(m.reports()).unwrap();
        assert_eq!(json[0]["operation"], "delete");
        assert_eq!(json[0]["statuses"]["NOT_FOUND"], 1);
    }
}
