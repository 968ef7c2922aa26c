//! The [`Binding`] and [`Db`] implementations the harness drives.
//!
//! One [`Adapter`] exists per harness run and is shared by every worker. It
//! owns the [`SessionPool`], which is built by the first worker to call
//! `init()`. Each [`AdapterDb`] holds one checked-out [`Session`] between
//! `init()` and `cleanup()`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::Connector;
use crate::config::{AdapterConfig, Properties};
use crate::db::{Binding, Db, Operation};
use crate::error::{BackendError, LifecycleError};
use crate::executor::Executor;
use crate::mapper;
use crate::pool::{Session, SessionPool};
use crate::record::{FieldSet, Record};
use crate::status::Status;

pub struct Adapter {
    connector: Arc<dyn Connector>,
    properties: Properties,
    pool: OnceCell<Arc<SessionPool>>,
}

impl Adapter {
    pub fn new(connector: Arc<dyn Connector>, properties: Properties) -> Arc<Self> {
        Arc::new(Self {
            connector,
            properties,
            pool: OnceCell::new(),
        })
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The shared pool, once some worker has initialised.
    pub fn pool(&self) -> Option<&Arc<SessionPool>> {
        self.pool.get()
    }

    /// A fresh per-worker handle. Nothing is dialed until `init()`.
    pub fn db(self: &Arc<Self>) -> AdapterDb {
        AdapterDb {
            adapter: self.clone(),
            session: None,
            config: None,
        }
    }

    fn configure(&self) -> Result<AdapterConfig, LifecycleError> {
        let config = AdapterConfig::from_properties(&self.properties)?;
        config.require(self.connector.required_options())?;
        Ok(config)
    }

    async fn shared_pool(&self, config: AdapterConfig) -> Arc<SessionPool> {
        self.pool
            .get_or_init(|| async move { SessionPool::new(self.connector.clone(), Arc::new(config)) })
            .await
            .clone()
    }
}

/// Hands out one [`AdapterDb`] per worker over a shared [`Adapter`].
#[async_trait]
impl Binding for Arc<Adapter> {
    fn name(&self) -> &str {
        self.connector.name()
    }

    fn new_db(&self) -> Box<dyn Db> {
        Box::new(self.db())
    }

    async fn shutdown(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}

pub struct AdapterDb {
    adapter: Arc<Adapter>,
    session: Option<Session>,
    config: Option<Arc<AdapterConfig>>,
}

impl AdapterDb {
    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Most recent native failure behind a non-OK status, for diagnostics.
    pub fn last_failure(&self) -> Option<&BackendError> {
        self.session.as_ref().and_then(Session::last_failure)
    }

    fn executor(&mut self) -> Option<Executor<'_>> {
        match (self.session.as_mut(), self.config.as_deref()) {
            (Some(session), Some(config)) => Some(Executor::new(session, config)),
            _ => None,
        }
    }
}

fn not_initialized(op: Operation, table: &str, key: &str) -> Status {
    mapper::report(
        op,
        table,
        key,
        &BackendError::ContractViolation("operation issued before init()".to_string()),
    )
}

#[async_trait]
impl Db for AdapterDb {
    async fn init(&mut self) -> Result<(), LifecycleError> {
        if self.session.is_some() {
            return Ok(());
        }
        let config = self.adapter.configure()?;
        let pool = self.adapter.shared_pool(config).await;
        let session = pool.checkout().await.map_err(LifecycleError::Connect)?;
        info!(
            backend = pool.backend(),
            session = session.id(),
            "worker session established"
        );
        self.config = Some(pool.config().clone());
        self.session = Some(session);
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), LifecycleError> {
        let Some(session) = self.session.take() else {
            debug!("cleanup without an active session");
            return Ok(());
        };
        let id = session.id();
        let Some(pool) = self.adapter.pool() else {
            return Ok(());
        };
        if let Err(err) = pool.release(session).await {
            warn!(session = id, error = %err, "failed to release session");
            return Err(LifecycleError::Release(err));
        }
        debug!(session = id, "worker session released");
        Ok(())
    }

    async fn read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Status {
        match self.executor() {
            Some(mut exec) => exec.read(table, key, fields, result).await,
            None => not_initialized(Operation::Read, table, key),
        }
    }

    async fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
        result: &mut Vec<(String, Record)>,
    ) -> Status {
        match self.executor() {
            Some(mut exec) => exec.scan(table, start_key, record_count, fields, result).await,
            None => not_initialized(Operation::Scan, table, start_key),
        }
    }

    async fn update(&mut self, table: &str, key: &str, values: &Record) -> Status {
        match self.executor() {
            Some(mut exec) => exec.update(table, key, values).await,
            None => not_initialized(Operation::Update, table, key),
        }
    }

    async fn insert(&mut self, table: &str, key: &str, values: &Record) -> Status {
        match self.executor() {
            Some(mut exec) => exec.insert(table, key, values).await,
            None => not_initialized(Operation::Insert, table, key),
        }
    }

    async fn delete(&mut self, table: &str, key: &str) -> Status {
        match self.executor() {
            Some(mut exec) => exec.delete(table, key).await,
            None => not_initialized(Operation::Delete, table, key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryConnector, MemoryStore};

    fn adapter(props: &[(&str, &str)]) -> (Arc<MemoryStore>, Arc<Adapter>) {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        let adapter = Adapter::new(
            Arc::new(MemoryConnector::new(store.clone())),
            props.iter().copied().collect(),
        );
        (store, adapter)
    }

    #[tokio::test]
    async fn operations_before_init_are_errors() {
        let (store, adapter) = adapter(&[("host", "localhost"), ("port", "7000")]);
        let mut db = adapter.db();
        let mut out = Record::new();
        assert_eq!(db.read("t", "k", None, &mut out).await, Status::Error);
        assert_eq!(db.insert("t", "k", &Record::new()).await, Status::Error);
        assert_eq!(store.stats().connections_opened(), 0);
    }

    #[tokio::test]
    async fn missing_required_option_fails_init() {
        let (_, adapter) = adapter(&[("host", "localhost")]);
        let mut db = adapter.db();
        let err = db.init().await.unwrap_err();
        assert!(matches!(err, LifecycleError::Config(_)), "{err}");
        assert_eq!(err.status(), Status::Error);
        assert!(adapter.pool().is_none());
    }

    #[tokio::test]
    async fn workers_share_one_pool() {
        let (_, adapter) = adapter(&[("host", "localhost"), ("port", "7000"), ("pool_size", "4")]);
        let mut a = adapter.db();
        let mut b = adapter.db();
        a.init().await.unwrap();
        b.init().await.unwrap();
        let pool = adapter.pool().unwrap();
        assert_eq!(pool.available(), 2);

        a.cleanup().await.unwrap();
        b.cleanup().await.unwrap();
        assert_eq!(pool.available(), 4);
        assert_eq!(pool.idle_connections(), 2);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent() {
        let (_, adapter) = adapter(&[("host", "localhost"), ("port", "7000")]);
        let mut db = adapter.db();
        db.cleanup().await.unwrap();
        db.init().await.unwrap();
        assert!(db.is_initialized());
        db.cleanup().await.unwrap();
        db.cleanup().await.unwrap();
        assert!(!db.is_initialized());
    }
}
