//! Translation of backend-native failures into [`Status`].
//!
//! This is the only place that knows which native conditions are transient.
//! Anything not recognised here becomes [`Status::Error`]; the original error
//! is still logged by [`report`] and kept by the session for diagnostics.

use std::io;

use tracing::{debug, warn};

use crate::db::Operation;
use crate::error::BackendError;
use crate::status::Status;

pub fn classify(err: &BackendError) -> Status {
    match err {
        BackendError::NotFound => Status::NotFound,
        BackendError::InvalidKey { .. }
        | BackendError::InvalidTable { .. }
        | BackendError::InvalidField { .. }
        | BackendError::Codec(_) => Status::BadRequest,
        BackendError::Timeout(_) | BackendError::Unavailable(_) => Status::ServiceUnavailable,
        BackendError::Auth(_) | BackendError::PoolClosed | BackendError::ContractViolation(_) => {
            Status::Error
        }
        BackendError::Io(e) => classify_io(e.kind()),
        #[cfg(feature = "rocksdb")]
        BackendError::RocksDb(e) => classify_rocksdb(e.kind()),
        #[cfg(feature = "surrealkv")]
        BackendError::SurrealKv(e) => classify_surrealkv(e),
        BackendError::Other(_) => Status::Error,
    }
}

fn classify_io(kind: io::ErrorKind) -> Status {
    match kind {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock => Status::ServiceUnavailable,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => Status::BadRequest,
        _ => Status::Error,
    }
}

#[cfg(feature = "rocksdb")]
fn classify_rocksdb(kind: rocksdb::ErrorKind) -> Status {
    use rocksdb::ErrorKind;

    match kind {
        ErrorKind::NotFound => Status::NotFound,
        ErrorKind::InvalidArgument => Status::BadRequest,
        ErrorKind::TimedOut
        | ErrorKind::Busy
        | ErrorKind::TryAgain
        | ErrorKind::Expired
        | ErrorKind::ShutdownInProgress => Status::ServiceUnavailable,
        _ => Status::Error,
    }
}

#[cfg(feature = "surrealkv")]
fn classify_surrealkv(err: &surrealkv::Error) -> Status {
    match err {
        // Optimistic commit lost a race; the harness may try again.
        surrealkv::Error::TransactionWriteConflict => Status::ServiceUnavailable,
        _ => Status::Error,
    }
}

/// Classify `err` and log it against the operation that produced it.
pub fn report(op: Operation, table: &str, key: &str, err: &BackendError) -> Status {
    let status = classify(err);
    match status {
        Status::NotFound => debug!(operation = %op, table, key, "record not found"),
        _ => warn!(
            operation = %op,
            table,
            key,
            status = %status,
            error = %err,
            "operation failed"
        ),
    }
    status
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::codec::CodecError;

    #[test]
    fn connectivity_failures_are_retryable() {
        let cases = [
            BackendError::Timeout(Duration::from_millis(5)),
            BackendError::unavailable("connection reset"),
            BackendError::Io(io::Error::from(io::ErrorKind::ConnectionRefused)),
            BackendError::Io(io::Error::from(io::ErrorKind::BrokenPipe)),
        ];
        for err in cases {
            assert_eq!(classify(&err), Status::ServiceUnavailable, "{err}");
        }
    }

    #[test]
    fn malformed_input_is_bad_request() {
        let cases = [
            BackendError::InvalidKey {
                key: String::new(),
                reason: "empty",
            },
            BackendError::InvalidField {
                field: "f".into(),
                reason: "too large".into(),
            },
            BackendError::Codec(CodecError::Truncated {
                offset: 3,
                needed: 4,
            }),
        ];
        for err in cases {
            assert_eq!(classify(&err), Status::BadRequest, "{err}");
        }
    }

    #[test]
    fn auth_and_unknown_failures_are_errors() {
        assert_eq!(
            classify(&BackendError::Auth("bad secret".into())),
            Status::Error
        );
        assert_eq!(
            classify(&BackendError::Other(anyhow::anyhow!("disk on fire"))),
            Status::Error
        );
        assert_eq!(
            classify(&BackendError::Io(io::Error::other("weird"))),
            Status::Error
        );
    }

    #[test]
    fn missing_record_is_not_found() {
        assert_eq!(classify(&BackendError::NotFound), Status::NotFound);
    }

    #[test]
    fn report_never_upgrades_to_ok() {
        let err = BackendError::Other(anyhow::anyhow!("unexpected"));
        assert_eq!(report(Operation::Read, "usertable", "user1", &err), Status::Error);
    }
}
