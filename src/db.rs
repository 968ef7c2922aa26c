use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::record::{FieldSet, Record};
use crate::status::Status;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Read,
    Scan,
    Update,
    Insert,
    Delete,
}

impl Operation {
    pub const ALL: [Operation; 5] = [
        Operation::Read,
        Operation::Scan,
        Operation::Update,
        Operation::Insert,
        Operation::Delete,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Read => "read",
            Operation::Scan => "scan",
            Operation::Update => "update",
            Operation::Insert => "insert",
            Operation::Delete => "delete",
        }
    }

    /// Operations that may be repeated without changing stored state.
    pub fn is_read_only(self) -> bool {
        matches!(self, Operation::Read | Operation::Scan)
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operations a harness worker drives against a storage backend.
///
/// One instance belongs to exactly one worker. Methods take `&mut self`, and
/// the trait is not `Sync`, so an instance (and the session inside it) can
/// never be used by two workers at once. A worker awaits each call before
/// issuing the next.
#[async_trait]
pub trait Db: Send {
    /// Establish this worker's session. Called once, before any operation.
    async fn init(&mut self) -> Result<(), LifecycleError>;

    /// Release this worker's session. Safe to call more than once and after a
    /// failed `init`.
    async fn cleanup(&mut self) -> Result<(), LifecycleError>;

    /// Read one record. `result` is only written when `Status::Ok` is returned.
    async fn read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Status;

    /// Read up to `record_count` records in key order, starting at
    /// `start_key` inclusive. `result` is only extended on `Status::Ok`.
    async fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
        result: &mut Vec<(String, Record)>,
    ) -> Status;

    /// Apply `values` to an existing record, leaving other fields untouched.
    async fn update(&mut self, table: &str, key: &str, values: &Record) -> Status;

    /// Write a full record.
    async fn insert(&mut self, table: &str, key: &str, values: &Record) -> Status;

    async fn delete(&mut self, table: &str, key: &str) -> Status;
}

/// Factory the harness holds for a backend: hands out one [`Db`] per worker
/// and tears down shared resources once every worker is done.
#[async_trait]
pub trait Binding: Send + Sync {
    fn name(&self) -> &str;

    fn new_db(&self) -> Box<dyn Db>;

    async fn shutdown(&self);
}

// Both traits are used as trait objects by the harness.
const _: () = {
    fn _assert_object_safe(_: &dyn Db, _: &dyn Binding) {}
};
