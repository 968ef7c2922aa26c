//! The five CRUD primitives, run over one worker's [`Session`].
//!
//! Each primitive validates its input, talks to the backend through the
//! session, decodes and projects records, and folds every failure into a
//! [`Status`] through the mapper. Output containers are only touched once the
//! whole operation has succeeded.

use std::time::Duration;

use tracing::debug;

use crate::codec;
use crate::config::AdapterConfig;
use crate::db::Operation;
use crate::error::BackendError;
use crate::mapper;
use crate::pool::Session;
use crate::record::{FieldSet, Record};
use crate::status::Status;

/// When to try a failed call again.
///
/// Only read-only operations are retried, only on transient failures, and
/// never more than `max_retries` times. Writes are attempted exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &AdapterConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: config.retry_backoff,
        }
    }

    /// Delay before the retry following failed `attempt` (0-based), or `None`
    /// to give up.
    pub fn next_delay(&self, op: Operation, attempt: u32, err: &BackendError) -> Option<Duration> {
        if !op.is_read_only()
            || attempt >= self.max_retries
            || !mapper::classify(err).is_retryable()
        {
            return None;
        }
        Some(self.base_backoff.saturating_mul(2u32.saturating_pow(attempt)))
    }
}

// Evaluate `$call` until it succeeds or the retry policy gives up.
macro_rules! retrying {
    ($exec:ident, $op:expr, $call:expr) => {{
        let mut attempt = 0;
        loop {
            match $call.await {
                Ok(value) => break Ok(value),
                Err(err) => match $exec.retry.next_delay($op, attempt, &err) {
                    Some(delay) => {
                        debug!(operation = %$op, attempt, error = %err, ?delay, "retrying");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => break Err(err),
                },
            }
        }
    }};
}

pub struct Executor<'a> {
    session: &'a mut Session,
    config: &'a AdapterConfig,
    retry: RetryPolicy,
}

impl<'a> Executor<'a> {
    pub fn new(session: &'a mut Session, config: &'a AdapterConfig) -> Self {
        Self {
            session,
            config,
            retry: RetryPolicy::from_config(config),
        }
    }

    pub async fn read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
        result: &mut Record,
    ) -> Status {
        match self.try_read(table, key, fields).await {
            Ok(record) => {
                result.extend(record);
                Status::Ok
            }
            Err(err) => self.fail(Operation::Read, table, key, err),
        }
    }

    pub async fn scan(
        &mut self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
        result: &mut Vec<(String, Record)>,
    ) -> Status {
        match self.try_scan(table, start_key, record_count, fields).await {
            Ok(records) => {
                result.extend(records);
                Status::Ok
            }
            Err(err) => self.fail(Operation::Scan, table, start_key, err),
        }
    }

    pub async fn update(&mut self, table: &str, key: &str, values: &Record) -> Status {
        match self.try_update(table, key, values).await {
            Ok(()) => Status::Ok,
            Err(err) => self.fail(Operation::Update, table, key, err),
        }
    }

    /// Inserting over an existing key replaces the whole record.
    pub async fn insert(&mut self, table: &str, key: &str, values: &Record) -> Status {
        match self.try_insert(table, key, values).await {
            Ok(()) => Status::Ok,
            Err(err) => self.fail(Operation::Insert, table, key, err),
        }
    }

    pub async fn delete(&mut self, table: &str, key: &str) -> Status {
        match self.try_delete(table, key).await {
            Ok(()) => Status::Ok,
            Err(err) => self.fail(Operation::Delete, table, key, err),
        }
    }

    async fn try_read(
        &mut self,
        table: &str,
        key: &str,
        fields: Option<&FieldSet>,
    ) -> Result<Record, BackendError> {
        validate_key(key, self.config)?;
        let stored = retrying!(self, Operation::Read, self.session.get(table, key))?;
        let bytes = stored.ok_or(BackendError::NotFound)?;
        Ok(codec::decode(&bytes, fields)?)
    }

    async fn try_scan(
        &mut self,
        table: &str,
        start_key: &str,
        record_count: usize,
        fields: Option<&FieldSet>,
    ) -> Result<Vec<(String, Record)>, BackendError> {
        if record_count == 0 {
            return Err(BackendError::ContractViolation(
                "scan record count must be positive".to_string(),
            ));
        }
        // An empty start key scans from the beginning of the table.
        if !start_key.is_empty() {
            validate_key(start_key, self.config)?;
        }
        let mut entries = retrying!(
            self,
            Operation::Scan,
            self.session.scan(table, start_key, record_count)
        )?;
        entries.truncate(record_count);
        entries
            .into_iter()
            .map(|(key, bytes)| -> Result<_, BackendError> {
                Ok((key, codec::decode(&bytes, fields)?))
            })
            .collect()
    }

    async fn try_update(
        &mut self,
        table: &str,
        key: &str,
        values: &Record,
    ) -> Result<(), BackendError> {
        validate_key(key, self.config)?;
        validate_record(values, self.config)?;
        let merge = |stored: &[u8]| -> Result<Vec<u8>, BackendError> {
            let mut record = codec::decode(stored, None)?;
            record.merge(values);
            Ok(codec::encode(&record)?)
        };
        if self.session.modify(table, key, &merge).await? {
            Ok(())
        } else {
            Err(BackendError::NotFound)
        }
    }

    async fn try_insert(
        &mut self,
        table: &str,
        key: &str,
        values: &Record,
    ) -> Result<(), BackendError> {
        validate_key(key, self.config)?;
        validate_record(values, self.config)?;
        let bytes = codec::encode(values)?;
        self.session.put(table, key, bytes).await
    }

    async fn try_delete(&mut self, table: &str, key: &str) -> Result<(), BackendError> {
        validate_key(key, self.config)?;
        if self.session.delete(table, key).await? {
            Ok(())
        } else {
            Err(BackendError::NotFound)
        }
    }

    fn fail(&mut self, op: Operation, table: &str, key: &str, err: BackendError) -> Status {
        let status = mapper::report(op, table, key, &err);
        self.session.record_failure(err);
        status
    }
}

pub fn validate_key(key: &str, config: &AdapterConfig) -> Result<(), BackendError> {
    let reason = if key.is_empty() {
        "key is empty"
    } else if key.len() > config.max_key_length {
        "key exceeds max_key_length"
    } else if !key.bytes().all(|b| b.is_ascii_graphic() || b == b' ') {
        "key must be printable ASCII"
    } else {
        return Ok(());
    };
    Err(BackendError::InvalidKey {
        key: key.to_string(),
        reason,
    })
}

pub fn validate_record(record: &Record, config: &AdapterConfig) -> Result<(), BackendError> {
    for (name, value) in record.iter() {
        if name.is_empty() {
            return Err(BackendError::InvalidField {
                field: String::new(),
                reason: "field name is empty".to_string(),
            });
        }
        if value.len() > config.max_field_bytes {
            return Err(BackendError::InvalidField {
                field: name.to_string(),
                reason: format!(
                    "value is {} bytes, limit is {}",
                    value.len(),
                    config.max_field_bytes
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_never_retried() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_backoff: Duration::from_millis(1),
        };
        let transient = BackendError::unavailable("down");
        for op in [Operation::Insert, Operation::Update, Operation::Delete] {
            assert_eq!(policy.next_delay(op, 0, &transient), None);
        }
        assert!(policy.next_delay(Operation::Read, 0, &transient).is_some());
        assert!(policy.next_delay(Operation::Scan, 0, &transient).is_some());
    }

    #[test]
    fn retries_are_bounded_and_back_off() {
        let policy = RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(10),
        };
        let err = BackendError::Timeout(Duration::from_millis(1));
        assert_eq!(
            policy.next_delay(Operation::Read, 0, &err),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            policy.next_delay(Operation::Read, 1, &err),
            Some(Duration::from_millis(20))
        );
        assert_eq!(policy.next_delay(Operation::Read, 2, &err), None);
    }

    #[test]
    fn only_transient_failures_are_retried() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::ZERO,
        };
        assert_eq!(
            policy.next_delay(Operation::Read, 0, &BackendError::Auth("no".into())),
            None
        );
        assert_eq!(policy.next_delay(Operation::Read, 0, &BackendError::NotFound), None);
    }

    #[test]
    fn keys_are_validated() {
        let config = AdapterConfig {
            max_key_length: 8,
            ..AdapterConfig::default()
        };
        assert!(validate_key("user1", &config).is_ok());
        assert!(validate_key("with space", &AdapterConfig::default()).is_ok());
        for bad in ["", "waytoolongkey", "tab\tkey", "ключ"] {
            assert!(
                matches!(validate_key(bad, &config), Err(BackendError::InvalidKey { .. })),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn oversized_and_unnamed_fields_are_rejected() {
        let config = AdapterConfig {
            max_field_bytes: 4,
            ..AdapterConfig::default()
        };
        assert!(validate_record(&Record::from_iter([("a", "1234")]), &config).is_ok());
        assert!(validate_record(&Record::from_iter([("a", "12345")]), &config).is_err());
        assert!(validate_record(&Record::from_iter([("", "1")]), &config).is_err());
    }
}
