//! Seam between the contract layer and concrete storage technologies.
//!
//! A [`Connector`] is shared by every worker and knows how to dial the
//! backend. Each session owns one [`Connection`] exclusively. Connections
//! speak in raw bytes; record encoding stays in [`crate::codec`].

pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocksdb;
#[cfg(feature = "surrealkv")]
pub mod surrealkv;

use async_trait::async_trait;

use crate::config::AdapterConfig;
use crate::error::BackendError;

/// Rewrites the stored bytes of one record. Runs inside the backend's
/// single-record atomic section.
pub type Modify<'a> = &'a (dyn Fn(&[u8]) -> Result<Vec<u8>, BackendError> + Send + Sync);

#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Options `init()` must find in the configuration.
    fn required_options(&self) -> &'static [&'static str];

    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn Connection>, BackendError>;

    /// Release shared native resources. Called once at harness shutdown.
    async fn shutdown(&self) {}
}

#[async_trait]
pub trait Connection: Send {
    /// Resolve a table name to the backend's container for it.
    async fn open_container(&mut self, table: &str) -> Result<Container, BackendError>;

    async fn get(&mut self, container: &Container, key: &str)
        -> Result<Option<Vec<u8>>, BackendError>;

    /// Up to `limit` entries with key >= `start`, ascending.
    async fn scan(
        &mut self,
        container: &Container,
        start: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError>;

    /// Store `value`, replacing any existing record.
    async fn put(&mut self, container: &Container, key: &str, value: Vec<u8>)
        -> Result<(), BackendError>;

    /// Atomically rewrite an existing record. Returns `false` if absent.
    async fn modify(
        &mut self,
        container: &Container,
        key: &str,
        f: Modify<'_>,
    ) -> Result<bool, BackendError>;

    /// Returns `false` if there was nothing to delete.
    async fn delete(&mut self, container: &Container, key: &str) -> Result<bool, BackendError>;

    async fn ping(&mut self) -> Result<(), BackendError>;

    async fn close(&mut self) -> Result<(), BackendError> {
        Ok(())
    }
}

/// Backend-native home of a table: every key in it is stored under
/// `table 0x00 key`, so a table's records are contiguous and sorted by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    table: String,
    prefix: Vec<u8>,
}

impl Container {
    const SEPARATOR: u8 = 0x00;

    pub fn for_table(table: &str) -> Result<Self, BackendError> {
        if table.is_empty() {
            return Err(BackendError::InvalidTable {
                table: table.to_string(),
                reason: "empty table name",
            });
        }
        if table.as_bytes().contains(&Self::SEPARATOR) {
            return Err(BackendError::InvalidTable {
                table: table.to_string(),
                reason: "table name contains NUL",
            });
        }
        let mut prefix = Vec::with_capacity(table.len() + 1);
        prefix.extend_from_slice(table.as_bytes());
        prefix.push(Self::SEPARATOR);
        Ok(Self {
            table: table.to_string(),
            prefix,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    pub fn encode_key(&self, key: &str) -> Vec<u8> {
        let mut raw = Vec::with_capacity(self.prefix.len() + key.len());
        raw.extend_from_slice(&self.prefix);
        raw.extend_from_slice(key.as_bytes());
        raw
    }

    /// Strip the container prefix. `None` if `raw` belongs elsewhere.
    pub fn decode_key(&self, raw: &[u8]) -> Option<String> {
        let key = raw.strip_prefix(self.prefix.as_slice())?;
        String::from_utf8(key.to_vec()).ok()
    }

    /// First raw key past the end of this container.
    pub fn upper_bound(&self) -> Vec<u8> {
        let mut bound = self.prefix.clone();
        if let Some(last) = bound.last_mut() {
            *last = Self::SEPARATOR + 1;
        }
        bound
    }
}
