//! Per-worker sessions over a bounded, lazily filled pool of connections.
//!
//! A [`Session`] owns one [`Connection`] exclusively. Connections are dialed
//! on demand, handed back to the pool when a session is released, and thrown
//! away when a call times out or the link fails, so the next call on that
//! worker starts from a fresh connection.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::backend::{Connection, Connector, Container, Modify};
use crate::config::AdapterConfig;
use crate::error::BackendError;

/// Run a backend call under `limit`, turning expiry into [`BackendError::Timeout`].
pub(crate) async fn guarded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or_else(|_| Err(BackendError::Timeout(limit)))
}

pub struct SessionPool {
    connector: Arc<dyn Connector>,
    config: Arc<AdapterConfig>,
    idle: Mutex<Vec<Box<dyn Connection>>>,
    permits: Arc<Semaphore>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl SessionPool {
    pub fn new(connector: Arc<dyn Connector>, config: Arc<AdapterConfig>) -> Arc<Self> {
        info!(
            backend = connector.name(),
            pool_size = config.pool_size,
            "session pool created"
        );
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.pool_size)),
            connector,
            config,
            idle: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Arc<AdapterConfig> {
        &self.config
    }

    pub fn backend(&self) -> &str {
        self.connector.name()
    }

    pub fn idle_connections(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sessions that can still be checked out without waiting.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Reserve a pool slot and make sure the session has a live connection.
    ///
    /// Waiting for a slot is bounded by the configured timeout; running out
    /// is reported as [`BackendError::Unavailable`].
    pub async fn checkout(self: &Arc<Self>) -> Result<Session, BackendError> {
        if self.is_closed() {
            return Err(BackendError::PoolClosed);
        }
        let permit = tokio::time::timeout(self.config.timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| {
                BackendError::unavailable(format!(
                    "no session available within {:?} (pool_size {})",
                    self.config.timeout, self.config.pool_size
                ))
            })?
            .map_err(|_| BackendError::PoolClosed)?;

        let mut session = Session {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            pool: self.clone(),
            timeout: self.config.timeout,
            conn: None,
            containers: HashMap::new(),
            last_failure: None,
            _permit: permit,
        };
        session.ping().await?;
        debug!(session = session.id, backend = self.backend(), "session checked out");
        Ok(session)
    }

    /// Return a session's connection to the idle list and free its slot.
    pub async fn release(&self, mut session: Session) -> Result<(), BackendError> {
        debug!(session = session.id, "session released");
        let Some(mut conn) = session.conn.take() else {
            return Ok(());
        };
        if self.is_closed() {
            return guarded(self.config.timeout, conn.close()).await;
        }
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
        Ok(())
    }

    /// Close idle connections and the connector. Sessions still checked out
    /// close their connection when released.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.permits.close();
        let idle = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        for mut conn in idle {
            if let Err(err) = guarded(self.config.timeout, conn.close()).await {
                warn!(backend = self.backend(), error = %err, "failed to close idle connection");
            }
        }
        self.connector.shutdown().await;
        info!(backend = self.backend(), "session pool closed");
    }

    async fn dial(&self) -> Result<Box<dyn Connection>, BackendError> {
        if self.is_closed() {
            return Err(BackendError::PoolClosed);
        }
        let reused = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match reused {
            Some(conn) => Ok(conn),
            None => guarded(self.config.timeout, self.connector.connect(&self.config)).await,
        }
    }
}

// Borrow the session's connection (dialing if needed), run one call on it
// under the session timeout, then let the session react to the outcome.
macro_rules! on_connection {
    ($session:ident, |$conn:ident| $call:expr) => {{
        let timeout = $session.timeout;
        let result = match $session.connection().await {
            Ok($conn) => guarded(timeout, $call).await,
            Err(err) => Err(err),
        };
        $session.settle(result).await
    }};
}

/// One worker's handle on the backend.
pub struct Session {
    id: u64,
    pool: Arc<SessionPool>,
    timeout: Duration,
    conn: Option<Box<dyn Connection>>,
    containers: HashMap<String, Container>,
    last_failure: Option<BackendError>,
    _permit: OwnedSemaphorePermit,
}

impl Session {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Most recent failure seen by an operation on this session.
    pub fn last_failure(&self) -> Option<&BackendError> {
        self.last_failure.as_ref()
    }

    pub(crate) fn record_failure(&mut self, err: BackendError) {
        self.last_failure = Some(err);
    }

    pub async fn ping(&mut self) -> Result<(), BackendError> {
        on_connection!(self, |conn| conn.ping())
    }

    pub async fn get(&mut self, table: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let container = self.container(table).await?;
        on_connection!(self, |conn| conn.get(&container, key))
    }

    pub async fn scan(
        &mut self,
        table: &str,
        start: &str,
        limit: usize,
    ) -> Result<Vec<(String, Vec<u8>)>, BackendError> {
        let container = self.container(table).await?;
        on_connection!(self, |conn| conn.scan(&container, start, limit))
    }

    pub async fn put(&mut self, table: &str, key: &str, value: Vec<u8>) -> Result<(), BackendError> {
        let container = self.container(table).await?;
        on_connection!(self, |conn| conn.put(&container, key, value))
    }

    pub async fn modify(
        &mut self,
        table: &str,
        key: &str,
        f: Modify<'_>,
    ) -> Result<bool, BackendError> {
        let container = self.container(table).await?;
        on_connection!(self, |conn| conn.modify(&container, key, f))
    }

    pub async fn delete(&mut self, table: &str, key: &str) -> Result<bool, BackendError> {
        let container = self.container(table).await?;
        on_connection!(self, |conn| conn.delete(&container, key))
    }

    /// Resolve `table` once per session; later calls hit the cache.
    async fn container(&mut self, table: &str) -> Result<Container, BackendError> {
        if let Some(container) = self.containers.get(table) {
            return Ok(container.clone());
        }
        let container = on_connection!(self, |conn| conn.open_container(table))?;
        self.containers.insert(table.to_string(), container.clone());
        Ok(container)
    }

    async fn connection(&mut self) -> Result<&mut Box<dyn Connection>, BackendError> {
        if self.conn.is_none() {
            let conn = self.pool.dial().await?;
            debug!(session = self.id, "session connected");
            self.conn = Some(conn);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| BackendError::unavailable("session has no connection"))
    }

    async fn settle<T>(&mut self, result: Result<T, BackendError>) -> Result<T, BackendError> {
        if let Err(err) = &result {
            if err.poisons_connection() {
                self.discard(err).await;
            }
        }
        result
    }

    /// Drop the current connection. The next call dials a new one.
    async fn discard(&mut self, cause: &BackendError) {
        if let Some(mut conn) = self.conn.take() {
            warn!(session = self.id, cause = %cause, "discarding session connection");
            if let Err(err) = guarded(self.timeout, conn.close()).await {
                debug!(session = self.id, error = %err, "close after failure also failed");
            }
        }
    }
}

// A session dropped without `release` hands its connection back to the idle list.
impl Drop for Session {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.pool.is_closed() {
            warn!(session = self.id, "session dropped after pool close; connection not closed");
            return;
        }
        warn!(session = self.id, "session dropped without release; connection returned to pool");
        self.pool
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(conn);
    }
}
