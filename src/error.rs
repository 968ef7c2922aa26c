use std::time::Duration;

use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::mapper;
use crate::status::Status;

/// Failures raised below the contract boundary.
///
/// These never reach the harness directly: [`crate::mapper::classify`] turns
/// each one into a [`Status`].
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("record not found")]
    NotFound,

    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid table {table:?}: {reason}")]
    InvalidTable { table: String, reason: &'static str },

    #[error("invalid field {field:?}: {reason}")]
    InvalidField { field: String, reason: String },

    #[error("caller contract violation: {0}")]
    ContractViolation(String),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("session pool is closed")]
    PoolClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "rocksdb")]
    #[error("rocksdb: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[cfg(feature = "surrealkv")]
    #[error("surrealkv: {0}")]
    SurrealKv(#[from] surrealkv::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BackendError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        BackendError::Unavailable(reason.into())
    }

    /// Whether the connection that produced this error should be thrown away.
    pub fn poisons_connection(&self) -> bool {
        matches!(
            self,
            BackendError::Timeout(_) | BackendError::Unavailable(_) | BackendError::Io(_)
        )
    }
}

/// Failure of `init()` or `cleanup()`. Fatal for the worker that hit it.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid adapter configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to establish session: {0}")]
    Connect(#[source] BackendError),

    #[error("failed to release session: {0}")]
    Release(#[source] BackendError),
}

impl LifecycleError {
    pub fn status(&self) -> Status {
        match self {
            LifecycleError::Config(_) => Status::Error,
            LifecycleError::Connect(err) | LifecycleError::Release(err) => mapper::classify(err),
        }
    }
}
