use clap::ValueEnum;
use rand::distributions::{Alphanumeric, Distribution, Uniform};
use rand::Rng;
use rand_distr::Zipf;
use serde::Serialize;

use anonymbe_bench::Record;

const ZIPFIAN_CONSTANT: f64 = 0.99;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadType {
    A,     // 50% read, 50% update
    B,     // 95% read, 5% update
    C,     // 100% read
    D,     // 95% read, 5% insert, latest keys favoured
    E,     // 95% scan, 5% insert
    F,     // 50% read, 50% read-modify-write
    Mixed, // reads, updates, inserts, scans and deletes
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Load,
    Run,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestDistribution {
    Uniform,
    Zipfian,
    Latest,
}

/// What a worker does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Read,
    Update,
    Insert,
    Scan,
    ReadModifyWrite,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Proportions {
    pub read: f64,
    pub update: f64,
    pub insert: f64,
    pub scan: f64,
    pub read_modify_write: f64,
    pub delete: f64,
}

impl Proportions {
    const NONE: Proportions = Proportions {
        read: 0.0,
        update: 0.0,
        insert: 0.0,
        scan: 0.0,
        read_modify_write: 0.0,
        delete: 0.0,
    };

    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> Step {
        let steps = [
            (self.read, Step::Read),
            (self.update, Step::Update),
            (self.insert, Step::Insert),
            (self.scan, Step::Scan),
            (self.read_modify_write, Step::ReadModifyWrite),
            (self.delete, Step::Delete),
        ];
        let total: f64 = steps.iter().map(|(p, _)| p).sum();
        let mut roll = rng.gen::<f64>() * total;
        for (p, step) in steps {
            if roll < p {
                return step;
            }
            roll -= p;
        }
        Step::Read
    }
}

impl WorkloadType {
    pub fn proportions(self) -> Proportions {
        let none = Proportions::NONE;
        match self {
            WorkloadType::A => Proportions {
                read: 0.5,
                update: 0.5,
                ..none
            },
            WorkloadType::B => Proportions {
                read: 0.95,
                update: 0.05,
                ..none
            },
            WorkloadType::C => Proportions { read: 1.0, ..none },
            WorkloadType::D => Proportions {
                read: 0.95,
                insert: 0.05,
                ..none
            },
            WorkloadType::E => Proportions {
                scan: 0.95,
                insert: 0.05,
                ..none
            },
            WorkloadType::F => Proportions {
                read: 0.5,
                read_modify_write: 0.5,
                ..none
            },
            WorkloadType::Mixed => Proportions {
                read: 0.4,
                update: 0.2,
                insert: 0.15,
                scan: 0.1,
                read_modify_write: 0.0,
                delete: 0.15,
            },
        }
    }

    /// Workload D reads what was written last unless told otherwise.
    pub fn default_distribution(self) -> RequestDistribution {
        match self {
            WorkloadType::D => RequestDistribution::Latest,
            _ => RequestDistribution::Zipfian,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkloadConfig {
    pub workload: WorkloadType,
    pub table: String,
    pub record_count: u64,
    pub operation_count: u64,
    pub field_count: usize,
    pub field_length: usize,
    pub max_scan_length: usize,
    pub distribution: RequestDistribution,
}

/// Picks record indices for reads, updates, scans and deletes.
pub struct KeyChooser {
    distribution: RequestDistribution,
    zipf: Option<Zipf<f64>>,
}

impl KeyChooser {
    pub fn new(distribution: RequestDistribution, record_count: u64) -> Self {
        let zipf = match distribution {
            RequestDistribution::Uniform => None,
            _ => Zipf::new(record_count.max(1), ZIPFIAN_CONSTANT).ok(),
        };
        Self { distribution, zipf }
    }

    /// An index below `upper`, the number of keys inserted so far.
    pub fn next_index<R: Rng + ?Sized>(&self, rng: &mut R, upper: u64) -> u64 {
        let upper = upper.max(1);
        let rank = match &self.zipf {
            // Zipf samples lie in [1, n].
            Some(zipf) => (zipf.sample(rng) as u64).saturating_sub(1),
            None => return rng.gen_range(0..upper),
        };
        match self.distribution {
            RequestDistribution::Latest => upper - 1 - rank.min(upper - 1),
            _ => rank % upper,
        }
    }
}

pub fn key_for(index: u64) -> String {
    format!("user{index}")
}

pub fn field_name(i: usize) -> String {
    format!("field{i}")
}

pub fn build_record<R: Rng + ?Sized>(rng: &mut R, field_count: usize, field_length: usize) -> Record {
    (0..field_count)
        .map(|i| (field_name(i), random_bytes(rng, field_length)))
        .collect()
}

/// One randomly chosen field with a fresh value, as YCSB updates do.
pub fn build_update<R: Rng + ?Sized>(rng: &mut R, field_count: usize, field_length: usize) -> Record {
    let i = rng.gen_range(0..field_count.max(1));
    Record::from_iter([(field_name(i), random_bytes(rng, field_length))])
}

pub fn scan_length<R: Rng + ?Sized>(rng: &mut R, max_scan_length: usize) -> usize {
    Uniform::new_inclusive(1, max_scan_length.max(1)).sample(rng)
}

fn random_bytes<R: Rng + ?Sized>(rng: &mut R, len: usize) -> Vec<u8> {
    rng.sample_iter(Alphanumeric).take(len).collect()
}
