//! Storage adapter for a YCSB-style benchmark harness.
//!
//! The harness only sees [`Binding`] and [`Db`]. Everything below them maps
//! the five CRUD primitives onto a backend through a pooled, per-worker
//! [`pool::Session`] and reports every outcome as a [`Status`].

pub mod adapter;
pub mod backend;
pub mod codec;
pub mod config;
pub mod db;
pub mod error;
pub mod executor;
pub mod mapper;
pub mod pool;
pub mod record;
pub mod status;

pub use adapter::{Adapter, AdapterDb};
pub use config::{AdapterConfig, Properties};
pub use db::{Binding, Db, Operation};
pub use error::{BackendError, LifecycleError};
pub use record::{FieldSet, Record};
pub use status::Status;
