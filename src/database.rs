use std::sync::Arc;

use clap::ValueEnum;
use tracing::info;

use anonymbe_bench::backend::memory::{MemoryConnector, MemoryStore};
use anonymbe_bench::backend::Connector;
use anonymbe_bench::config::{self, Credentials};
use anonymbe_bench::{Adapter, Binding, Properties};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Database {
    Memory,
    #[cfg(feature = "rocksdb")]
    Rocksdb,
    #[cfg(feature = "surrealkv")]
    Surrealkv,
}

impl Database {
    /// Build the binding the workers share.
    ///
    /// The memory backend runs in-process, so a store is started at the
    /// configured endpoint (default `localhost:7000`) before connecting.
    pub fn binding(self, mut properties: Properties) -> anyhow::Result<Arc<dyn Binding>> {
        let connector: Arc<dyn Connector> = match self {
            Database::Memory => {
                if properties.get(config::HOST).is_none() {
                    properties.set(config::HOST, "localhost");
                }
                if properties.get(config::PORT).is_none() {
                    properties.set(config::PORT, "7000");
                }
                let endpoint = format!(
                    "{}:{}",
                    properties.get(config::HOST).unwrap_or_default(),
                    properties.get(config::PORT).unwrap_or_default()
                );
                let mut store = MemoryStore::new(endpoint.as_str());
                if let Some(raw) = properties.get(config::CREDENTIALS) {
                    store = store.with_credentials(raw.parse::<Credentials>().map_err(anyhow::Error::msg)?);
                }
                info!(endpoint = %endpoint, "started in-process memory store");
                Arc::new(MemoryConnector::new(Arc::new(store)))
            }
            #[cfg(feature = "rocksdb")]
            Database::Rocksdb => {
                Arc::new(anonymbe_bench::backend::rocksdb::RocksDbConnector::new())
            }
            #[cfg(feature = "surrealkv")]
            Database::Surrealkv => {
                Arc::new(anonymbe_bench::backend::surrealkv::SurrealKvConnector::new())
            }
        };
        Ok(Arc::new(Adapter::new(connector, properties)))
    }
}
