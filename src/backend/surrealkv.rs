//! SurrealKV backend. The store is opened by the first connection and shared
//! by all of them; every call runs in its own transaction.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use surrealkv::{Mode, Store};
use tracing::info;

use super::{Connection, Connector, Container, Modify};
use crate::config::{self, AdapterConfig};
use crate::error::BackendError;

fn open(path: &Path) -> Result<Store, BackendError> {
    let mut opts = surrealkv::Options::new();
    opts.enable_versions = false;
    opts.disk_persistence = true;
    opts.dir = path.to_path_buf();
    Ok(Store::new(opts)?)
}

#[derive(Default)]
pub struct SurrealKvConnector {
    store: Mutex<Option<(PathBuf, Arc<Store>)>>,
}

impl SurrealKvConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for SurrealKvConnector {
    fn name(&self) -> &str {
        "surrealkv"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &[config::PATH]
    }

    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn Connection>, BackendError> {
        let path = config
            .path
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("no store directory configured"))?;

        let mut slot = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        let store = match slot.as_ref() {
            Some((open_path, store)) if open_path == path => store.clone(),
            Some((open_path, _)) => {
                return Err(BackendError::unavailable(format!(
                    "store already open at {}",
                    open_path.display()
                )))
            }
            None => {
                let store = Arc::new(open(path)?);
                info!(path = %path.display(), "surrealkv opened");
                *slot = Some((path.to_path_buf(), store.clone()));
                store
            }
        };
        Ok(Box::new(SurrealKvConnection { store: Some(store) }))
    }

    async fn shutdown(&self) {
        let released = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((path, _)) = released {
            info!(path = %path.display(), "surrealkv closed");
        }
    }
}

pub struct SurrealKvConnection {
    store: Option<Arc<Store>>,
}

impl SurrealKvConnection {
    fn store(&self) -> Result<&Store, BackendError> {
        self.store
            .as_deref()
            .ok_or_else(|| BackendError::unavailable("connection already closed"))
    }
}

#[async_trait]
impl Connection for SurrealKvConnection {
    async fn open_container(&mut self, table: &str) -> Result<Container, BackendError> {
        self.store()?;
        Container::for_table(table)
    }

    async fn get(
        &mut self,
        container: &Container,
        key: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        let raw = container.encode_key(key);
        let mut txn = self.store()?.begin_with_mode(Mode::ReadOnly)?;
        Ok(txn.get(&raw)?)
    }

    async fn scan(
        &mut self,
        container: &Container,
        start: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let from = container.encode_key(start);
        let until = container.upper_bound();
        let mut txn = self.store()?.begin_with_mode(Mode::ReadOnly)?;

        let range = from.as_slice()..until.as_slice();
        let mut entries = Vec::new();
        for (raw_key, value, _) in txn.scan(range, Some(limit))? {
            if let Some(key) = container.decode_key(&raw_key) {
                entries.push((key, value.to_vec()));
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
        let raw = container.encode_key(key);
        let mut txn = self.store()?.begin_with_mode(Mode::ReadWrite)?;
        txn.set(&raw, &value)?;
        txn.commit().await?;
        Ok(())
    }

    async fn modify(
        &mut self,
        container: &Container,
        key: &str,
        f: Modify<'_>,
    ) -> Result<bool, BackendError> {
        let raw = container.encode_key(key);
        let mut txn = self.store()?.begin_with_mode(Mode::ReadWrite)?;
        let Some(stored) = txn.get(&raw)? else {
            return Ok(false);
        };
        let updated = f(&stored)?;
        txn.set(&raw, &updated)?;
        txn.commit().await?;
        Ok(true)
    }

    async fn delete(&mut self, container: &Container, key: &str) -> Result<bool, BackendError> {
        let raw = container.encode_key(key);
        let mut txn = self.store()?.begin_with_mode(Mode::ReadWrite)?;
        if txn.get(&raw)?.is_none() {
            return Ok(false);
        }
        txn.delete(&raw)?;
        txn.commit().await?;
        Ok(true)
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.store().map(|_| ())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.store = None;
        Ok(())
    }
}
