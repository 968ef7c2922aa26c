//! RocksDB backend: one `TransactionDB` per process, shared by every
//! connection. A connection is a cheap handle on that database.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use rocksdb::{
    DBCompactionStyle, DBCompressionType, Direction, IteratorMode, LogLevel,
    Options as RocksDBOptions, ReadOptions, Transaction, TransactionDB, TransactionDBOptions,
    TransactionOptions, WriteOptions,
};
use tracing::info;

use super::{Connection, Connector, Container, Modify};
use crate::config::{self, AdapterConfig};
use crate::error::BackendError;

fn open(path: &Path) -> Result<TransactionDB, BackendError> {
    let mut opts = RocksDBOptions::default();
    // Use fdatasync
    opts.set_use_fsync(false);
    opts.set_log_level(LogLevel::Error);
    opts.set_keep_log_file_num(20);
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);
    opts.set_compaction_style(DBCompactionStyle::Level);
    opts.increase_parallelism(num_cpus::get() as i32);
    opts.set_max_write_buffer_number(32);
    opts.set_write_buffer_size(256 * 1024 * 1024);
    opts.set_target_file_size_base(512 * 1024 * 1024);
    opts.set_min_write_buffer_number_to_merge(4);
    opts.set_enable_pipelined_write(true);
    // Values of 4KB and up live in blob files
    opts.set_enable_blob_files(true);
    opts.set_min_blob_size(4 * 1024);
    opts.set_compression_per_level(&[
        DBCompressionType::None,
        DBCompressionType::None,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
        DBCompressionType::Snappy,
    ]);

    let txn_db_opts = TransactionDBOptions::default();
    Ok(TransactionDB::open(&opts, &txn_db_opts, path)?)
}

#[derive(Default)]
pub struct RocksDbConnector {
    db: Mutex<Option<(PathBuf, Arc<TransactionDB>)>>,
}

impl RocksDbConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for RocksDbConnector {
    fn name(&self) -> &str {
        "rocksdb"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &[config::PATH]
    }

    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn Connection>, BackendError> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("no database path configured"))?;

        let mut slot = self.db.lock().unwrap_or_else(PoisonError::into_inner);
        let db = match slot.as_ref() {
            Some((open_path, db)) if open_path == path => db.clone(),
            Some((open_path, _)) => {
                return Err(BackendError::unavailable(format!(
                    "database already open at {}",
                    open_path.display()
                )))
            }
            None => {
                let db = Arc::new(open(path)?);
                info!(path = %path.display(), "rocksdb opened");
                *slot = Some((path.to_path_buf(), db.clone()));
                db
            }
        };
        Ok(Box::new(RocksDbConnection { db: Some(db) }))
    }

    async fn shutdown(&self) {
        let released = self.db.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some((path, _)) = released {
            info!(path = %path.display(), "rocksdb closed");
        }
    }
}

pub struct RocksDbConnection {
    db: Option<Arc<TransactionDB>>,
}

impl RocksDbConnection {
    fn db(&self) -> Result<&TransactionDB, BackendError> {
        self.db
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("connection already closed"))
    }

    fn transaction(&self) -> Result<Transaction<'_, TransactionDB>, BackendError> {
        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_snapshot(true);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(false);

        Ok(self.db()?.transaction_opt(&write_opts, &txn_opts))
    }

    fn read_options() -> ReadOptions {
        let mut opts = ReadOptions::default();
        opts.set_async_io(true);
        opts.fill_cache(true);
        opts
    }
}

#[async_trait]
impl Connection for RocksDbConnection {
    async fn open_container(&mut self, table: &str) -> Result<Container, BackendError> {
        self.db()?;
        Container::for_table(table)
    }

    async fn get(
        &mut self,
        container: &Container,
        key: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let raw = container.encode_key(key);
        Ok(self.db()?.get_opt(raw, &Self::read_options())?)
    }

    async fn scan(
        &mut self,
        container: &Container,
        start: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let from = container.encode_key(start);
        let mut opts = Self::read_options();
        opts.set_iterate_upper_bound(container.upper_bound());

        let iter = self
            .db()?
            .iterator_opt(IteratorMode::From(&from, Direction::Forward), opts);
        let mut entries = Vec::with_capacity(limit.min(1024));
        for item in iter {
            if entries.len() >= limit {
                break;
            }
            let (raw_key, value) = item?;
            if let Some(key) = container.decode_key(&raw_key) {
                entries.push((key, value.into_vec()));
            }
        }
        Ok(entries)
    }

    async fn put(
        &mut self,
        container: &Container,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), BackendError> {
        let txn = self.transaction()?;
        txn.put(container.encode_key(key), value)?;
        txn.commit()?;
        Ok(())
    }

    async fn modify(
        &mut self,
        container: &Container,
        key: &str,
        f: Modify<'_>,
    ) -> Result<bool, BackendError> {
        let raw = container.encode_key(key);
        let txn = self.transaction()?;
        let Some(stored) = txn.get_for_update(&raw, true)? else {
            return Ok(false);
        };
        txn.put(&raw, f(&stored)?)?;
        txn.commit()?;
        Ok(true)
    }

    async fn delete(&mut self, container: &Container, key: &str) -> Result<bool, BackendError> {
        let raw = container.encode_key(key);
        let txn = self.transaction()?;
        if txn.get_for_update(&raw, true)?.is_none() {
            return Ok(false);
        }
        txn.delete(&raw)?;
        txn.commit()?;
        Ok(true)
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.db().map(|_| ())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.db = None;
        Ok(())
    }
}
