//! Native byte layout of a [`Record`].
//!
//! A record is stored as a sequence of fields, each laid out as
//!
//! ```text
//! +-------------+--------------+------------+-------------+
//! | name_len u32| value_len u32| name bytes | value bytes |
//! +-------------+--------------+------------+-------------+
//! ```
//!
//! with big-endian lengths and UTF-8 names. Field order is preserved.
//! Projection happens during decoding: values of unrequested fields are
//! skipped over without being copied.

use thiserror::Error;

use crate::record::{FieldSet, Record};

const LEN_BYTES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("record truncated at byte {offset}: {needed} more bytes expected")]
    Truncated { offset: usize, needed: usize },

    #[error("field name at byte {offset} is not valid UTF-8")]
    InvalidName { offset: usize },

    #[error("duplicate field {0:?}")]
    DuplicateField(String),

    #[error("field {name:?} is too large to encode ({len} bytes)")]
    TooLarge { name: String, len: usize },
}

pub fn encoded_len(record: &Record) -> usize {
    record
        .iter()
        .map(|(n, v)| 2 * LEN_BYTES + n.len() + v.len())
        .sum()
}

pub fn encode(record: &Record) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(encoded_len(record));
    for (name, value) in record.iter() {
        out.extend_from_slice(&length_prefix(name, name.len())?);
        out.extend_from_slice(&length_prefix(name, value.len())?);
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(value);
    }
    Ok(out)
}

fn length_prefix(name: &str, len: usize) -> Result<[u8; LEN_BYTES], CodecError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| CodecError::TooLarge {
            name: name.to_string(),
            len,
        })
}

pub fn decode(data: &[u8], fields: Option<&FieldSet>) -> Result<Record, CodecError> {
    let mut cursor = Cursor { data, offset: 0 };
    let mut record = Record::new();
    // Names seen so far, including skipped ones, so duplicates are caught
    // regardless of the projection.
    let mut seen = FieldSet::new();

    while !cursor.is_empty() {
        let name_len = cursor.read_len()?;
        let value_len = cursor.read_len()?;
        let name_offset = cursor.offset;
        let name = std::str::from_utf8(cursor.take(name_len)?)
            .map_err(|_| CodecError::InvalidName {
                offset: name_offset,
            })?;
        if !seen.insert(name.to_string()) {
            return Err(CodecError::DuplicateField(name.to_string()));
        }
        let value = cursor.take(value_len)?;
        if fields.map_or(true, |wanted| wanted.contains(name)) {
            record.insert(name, value);
        }
    }
    Ok(record)
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn is_empty(&self) -> bool {
        self.offset >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.data.len() - self.offset;
        if remaining < len {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: len - remaining,
            });
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_len(&mut self) -> Result<usize, CodecError> {
        let bytes = self.take(LEN_BYTES)?;
        let mut buf = [0u8; LEN_BYTES];
        buf.copy_from_slice(bytes);
        Ok(u32::from_be_bytes(buf) as usize)
    }
}
