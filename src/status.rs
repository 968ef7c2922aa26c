//! Outcome vocabulary shared by the harness and every adapter.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Result of a single CRUD operation.
///
/// Every operation returns exactly one of these values. There is no
/// "unimplemented" member: an adapter that lacks an operation does not
/// compile against [`crate::db::Db`].
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Ok,
    NotFound,
    /// Malformed input: bad key, oversized field, undecodable record.
    BadRequest,
    /// Transient connectivity or timeout failure. Safe for the harness to retry.
    ServiceUnavailable,
    /// Non-retryable failure, including anything the mapper did not recognise.
    Error,
}

impl Status {
    pub const ALL: [Status; 5] = [
        Status::Ok,
        Status::NotFound,
        Status::BadRequest,
        Status::ServiceUnavailable,
        Status::Error,
    ];

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    pub fn is_retryable(self) -> bool {
        self == Status::ServiceUnavailable
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NotFound => "NOT_FOUND",
            Status::BadRequest => "BAD_REQUEST",
            Status::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Status::Error => "ERROR",
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
