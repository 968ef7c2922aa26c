//! In-process backend that behaves like a small remote key-value service.
//!
//! A [`MemoryStore`] "listens" on a `host:port` endpoint and may demand
//! credentials, so connection parameters matter the way they would for a
//! networked store. It also accepts injected faults and counts every call,
//! which is what the contract tests use to observe retries, timeouts and
//! connection churn.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Connection, Connector, Container, Modify};
use crate::config::{self, AdapterConfig, Credentials};
use crate::error::BackendError;

/// A fault the store applies to the next call it receives.
#[derive(Debug, Clone)]
pub enum Fault {
    /// Fail as if the peer reset the connection.
    Disconnect,
    /// Stall before serving the call.
    Delay(Duration),
    /// Stream this many scan entries, then fail. Ignored by other calls.
    AbortScanAfter(usize),
    /// Fail with an error the store has no classification for.
    Internal(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Get,
    Scan,
    Put,
    Modify,
    Delete,
    Ping,
}

impl Call {
    const COUNT: usize = 6;

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Default)]
pub struct MemoryStats {
    opened: AtomicU64,
    closed: AtomicU64,
    calls: [AtomicU64; Call::COUNT],
}

impl MemoryStats {
    pub fn connections_opened(&self) -> u64 {
        self.opened.load(Ordering::Relaxed)
    }

    pub fn connections_closed(&self) -> u64 {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn calls(&self, call: Call) -> u64 {
        self.calls[call.index()].load(Ordering::Relaxed)
    }
}

pub struct MemoryStore {
    endpoint: String,
    credentials: Option<Credentials>,
    available: AtomicBool,
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    faults: Mutex<VecDeque<Fault>>,
    stats: MemoryStats,
}

impl MemoryStore {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            credentials: None,
            available: AtomicBool::new(true),
            data: RwLock::new(BTreeMap::new()),
            faults: Mutex::new(VecDeque::new()),
            stats: MemoryStats::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stats(&self) -> &MemoryStats {
        &self.stats
    }

    /// Queue a fault for the next call. Faults apply in FIFO order.
    pub fn inject(&self, fault: Fault) {
        lock(&self.faults).push_back(fault);
    }

    /// Take the whole service up or down. While down, every call and every
    /// connection attempt fails as unreachable.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of records across all tables.
    pub fn len(&self) -> usize {
        read(&self.data).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store bytes without going through the codec, e.g. to plant a corrupt
    /// record.
    pub fn put_raw(&self, table: &str, key: &str, bytes: Vec<u8>) -> Result<(), BackendError> {
        let container = Container::for_table(table)?;
        write(&self.data).insert(container.encode_key(key), bytes);
        Ok(())
    }

    pub fn get_raw(&self, table: &str, key: &str) -> Option<Vec<u8>> {
        let container = Container::for_table(table).ok()?;
        read(&self.data).get(&container.encode_key(key)).cloned()
    }

    fn check_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("{} is not accepting connections", self.endpoint),
            )))
        }
    }

    /// Count the call, then apply the next queued fault. Returns the scan
    /// abort point if the fault was [`Fault::AbortScanAfter`].
    async fn admit(&self, call: Call) -> Result<Option<usize>, BackendError> {
        self.stats.calls[call.index()].fetch_add(1, Ordering::Relaxed);
        self.check_available()?;
        let fault = lock(&self.faults).pop_front();
        match fault {
            None => Ok(None),
            Some(Fault::Disconnect) => Err(BackendError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            ))),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(None)
            }
            Some(Fault::AbortScanAfter(n)) => Ok(Some(n)),
            Some(Fault::Internal(message)) => Err(BackendError::Other(anyhow::anyhow!(message))),
        }
    }
}

// A poisoned lock only means another worker panicked mid-operation; the map
// itself is never left half-written, so keep serving.
fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl MemoryConnector {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    fn name(&self) -> &str {
        "memory"
    }

    fn required_options(&self) -> &'static [&'static str] {
        &[config::HOST, config::PORT]
    }

    async fn connect(&self, config: &AdapterConfig) -> Result<Box<dyn Connection>, BackendError> {
        self.store.check_available()?;

        let endpoint = config.endpoint().unwrap_or_default();
        if endpoint != self.store.endpoint {
            return Err(BackendError::Io(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                format!("nothing listening on {endpoint}"),
            )));
        }
        if let Some(expected) = &self.store.credentials {
            match &config.credentials {
                Some(given) if given == expected => {}
                Some(given) => {
                    return Err(BackendError::Auth(format!(
                        "rejected credentials for user {}",
                        given.user
                    )))
                }
                None => return Err(BackendError::Auth("credentials required".to_string())),
            }
        }

        self.store.stats.opened.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %endpoint, "memory connection opened");
        Ok(Box::new(MemoryConnection {
            store: self.store.clone(),
            closed: false,
        }))
    }
}

pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    closed: bool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> Result<(), BackendError> {
        if self.closed {
            Err(BackendError::unavailable("connection already closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn open_container(&mut self, table: &str) -> Result<Container, BackendError> {
        self.ensure_open()?;
        Container::for_table(table)
    }

    async fn get(
        &mut self,
        container: &Container,
        key: &str,
    ) -> Result<Option<Vec<u8>>, BackendError> {
        self.ensure_open()?;
        self.store.admit(Call::Get).await?;
        Ok(read(&self.store.data).get(&container.encode_key(key)).cloned())
    }

    async fn scan(
        &mut self,
        container: &Container,
        start: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        self.ensure_open()?;
        let abort_after = self.store.admit(Call::Scan).await?;

        let data = read(&self.store.data);
        let range = data.range(container.encode_key(start)..container.upper_bound());
        let mut entries = Vec::new();
        for (raw_key, value) in range.take(limit) {
            if abort_after.is_some_and(|n| entries.len() >= n) {
                return Err(BackendError::unavailable("scan stream reset"));
            }
            if let Some(key) = container.decode_key(raw_key) {
                entries.push((key, value.clone()));
            }
        }
        if abort_after.is_some() {
            return Err(BackendError::unavailable("scan stream reset"));
        }
        Ok(entries)
    }

    async fn put(
        &mut self,
        container: &Container,
        key: &str,
        value: Vec<u8>,
    ) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.store.admit(Call::Put).await?;
        write(&self.store.data).insert(container.encode_key(key), value);
        Ok(())
    }

    async fn modify(
        &mut self,
        container: &Container,
        key: &str,
        f: Modify<'_>,
    ) -> Result<bool, BackendError> {
        self.ensure_open()?;
        self.store.admit(Call::Modify).await?;
        let mut data = write(&self.store.data);
        match data.get_mut(&container.encode_key(key)) {
            Some(stored) => {
                *stored = f(stored)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&mut self, container: &Container, key: &str) -> Result<bool, BackendError> {
        self.ensure_open()?;
        self.store.admit(Call::Delete).await?;
        Ok(write(&self.store.data)
            .remove(&container.encode_key(key))
            .is_some())
    }

    async fn ping(&mut self) -> Result<(), BackendError> {
        self.ensure_open()?;
        self.store.stats.calls[Call::Ping.index()].fetch_add(1, Ordering::Relaxed);
        self.store.check_available()
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        if !self.closed {
            self.closed = true;
            self.store.stats.closed.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Properties;

    fn config_for(endpoint_port: &str) -> AdapterConfig {
        let props: Properties = [("host", "localhost"), ("port", endpoint_port)]
            .into_iter()
            .collect();
        AdapterConfig::from_properties(&props).unwrap()
    }

    async fn connect(store: &Arc<MemoryStore>) -> Box<dyn Connection> {
        MemoryConnector::new(store.clone())
            .connect(&config_for("7000"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn wrong_endpoint_is_refused() {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        let err = MemoryConnector::new(store.clone())
            .connect(&config_for("7001"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BackendError::Io(ref e) if e.kind() == io::ErrorKind::ConnectionRefused));
        assert_eq!(store.stats().connections_opened(), 0);
    }

    #[tokio::test]
    async fn credentials_are_checked() {
        let store = Arc::new(
            MemoryStore::new("localhost:7000").with_credentials(Credentials::new("u", "p")),
        );
        let connector = MemoryConnector::new(store);
        let mut cfg = config_for("7000");
        assert!(matches!(connector.connect(&cfg).await, Err(BackendError::Auth(_))));
        cfg.credentials = Some(Credentials::new("u", "wrong"));
        assert!(matches!(connector.connect(&cfg).await, Err(BackendError::Auth(_))));
        cfg.credentials = Some(Credentials::new("u", "p"));
        assert!(connector.connect(&cfg).await.is_ok());
    }

    #[tokio::test]
    async fn scan_stays_inside_container_and_honours_limit() {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        for key in ["k1", "k2", "k3"] {
            store.put_raw("t", key, key.as_bytes().to_vec()).unwrap();
        }
        store.put_raw("t2", "k0", b"other".to_vec()).unwrap();
        let mut conn = connect(&store).await;
        let c = conn.open_container("t").await.unwrap();

        let all = conn.scan(&c, "", 10).await.unwrap();
        let keys: Vec<_> = all.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["k1", "k2", "k3"]);

        let two = conn.scan(&c, "k2", 1).await.unwrap();
        assert_eq!(two, vec![("k2".to_string(), b"k2".to_vec())]);
        assert!(conn.scan(&c, "k5", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn aborted_scan_returns_error_not_partial_entries() {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        for key in ["a", "b", "c"] {
            store.put_raw("t", key, vec![1]).unwrap();
        }
        let mut conn = connect(&store).await;
        let c = conn.open_container("t").await.unwrap();
        store.inject(Fault::AbortScanAfter(2));
        assert!(matches!(
            conn.scan(&c, "a", 3).await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(conn.scan(&c, "a", 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn delete_and_modify_report_absence() {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        let mut conn = connect(&store).await;
        let c = conn.open_container("t").await.unwrap();
        assert!(!conn.delete(&c, "missing").await.unwrap());
        let rewrite = |_: &[u8]| -> Result<Vec<u8>, BackendError> { Ok(b"new".to_vec()) };
        assert!(!conn.modify(&c, "missing", &rewrite).await.unwrap());

        conn.put(&c, "k", b"old".to_vec()).await.unwrap();
        assert!(conn.modify(&c, "k", &rewrite).await.unwrap());
        assert_eq!(store.get_raw("t", "k"), Some(b"new".to_vec()));
        assert!(conn.delete(&c, "k").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn closed_connection_refuses_work() {
        let store = Arc::new(MemoryStore::new("localhost:7000"));
        let mut conn = connect(&store).await;
        conn.close().await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(store.stats().connections_closed(), 1);
        assert!(conn.ping().await.is_err());
    }
}
