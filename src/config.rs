//! Adapter configuration.
//!
//! The harness hands every adapter a flat [`Properties`] map, built from an
//! optional TOML file plus `key=value` overrides. [`AdapterConfig`] picks out
//! the options this adapter understands and ignores the rest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const HOST: &str = "host";
pub const PORT: &str = "port";
pub const CREDENTIALS: &str = "credentials";
pub const TIMEOUT_MS: &str = "timeout_ms";
pub const POOL_SIZE: &str = "pool_size";
pub const MAX_RETRIES: &str = "max_retries";
pub const RETRY_BACKOFF_MS: &str = "retry_backoff_ms";
pub const PATH: &str = "path";
pub const MAX_KEY_LENGTH: &str = "max_key_length";
pub const MAX_FIELD_BYTES: &str = "max_field_bytes";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required option `{0}`")]
    Missing(String),

    #[error("invalid value {value:?} for option `{option}`: {reason}")]
    Invalid {
        option: String,
        value: String,
        reason: String,
    },

    #[error("malformed property assignment {0:?} (expected key=value)")]
    Assignment(String),

    #[error("failed to parse properties file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read properties file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Flat string options, as the harness passes them to an adapter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Apply a `key=value` override. Whitespace around both sides is trimmed.
    pub fn apply_assignment(&mut self, assignment: &str) -> Result<(), ConfigError> {
        let (key, value) = assignment
            .split_once('=')
            .map(|(k, v)| (k.trim(), v.trim()))
            .filter(|(k, _)| !k.is_empty())
            .ok_or_else(|| ConfigError::Assignment(assignment.to_string()))?;
        self.set(key, value);
        Ok(())
    }

    /// Parse a TOML document. Nested tables become dotted keys and scalars are
    /// stringified, so `[rocksdb]\npath = "/tmp/x"` yields `rocksdb.path`.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = source.parse()?;
        let mut props = Properties::new();
        flatten_into(&mut props, "", &toml::Value::Table(table));
        Ok(props)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Overlay `other` onto this map; keys in `other` win.
    pub fn merge(&mut self, other: Properties) {
        self.0.extend(other.0);
    }

    fn parse<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.parse::<T>().map_err(|e| ConfigError::Invalid {
                    option: key.to_string(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }
}

fn flatten_into(props: &mut Properties, prefix: &str, value: &toml::Value) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                let full = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(props, &full, nested);
            }
        }
        toml::Value::String(s) => {
            props.set(prefix, s.as_str());
        }
        toml::Value::Array(items) => {
            let joined: Vec<String> = items.iter().map(scalar_string).collect();
            props.set(prefix, joined.join(","));
        }
        other => {
            props.set(prefix, scalar_string(other));
        }
    }
}

fn scalar_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Properties(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// `user:secret` pair. The secret never appears in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    secret: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl FromStr for Credentials {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, secret)) if !user.is_empty() => Ok(Credentials::new(user, secret)),
            _ => Err("expected user:secret".to_string()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Resolved adapter options.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub credentials: Option<Credentials>,
    /// Upper bound on a single backend call, also used when waiting for a
    /// pool slot.
    pub timeout: Duration,
    pub pool_size: usize,
    /// Extra attempts for `read` and `scan` after a transient failure.
    /// Zero unless `max_retries` is set, so nothing retries by default.
    pub max_retries: u32,
    pub retry_backoff: Duration,
    /// Data directory for embedded backends.
    pub path: Option<PathBuf>,
    pub max_key_length: usize,
    pub max_field_bytes: usize,
}

impl AdapterConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5_000);
    pub const DEFAULT_POOL_SIZE: usize = 64;
    pub const DEFAULT_MAX_RETRIES: u32 = 0;
    pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(10);
    pub const DEFAULT_MAX_KEY_LENGTH: usize = 255;
    pub const DEFAULT_MAX_FIELD_BYTES: usize = 1024 * 1024;

    pub fn from_properties(props: &Properties) -> Result<Self, ConfigError> {
        let mut config = AdapterConfig::default();

        if let Some(host) = props.get(HOST) {
            if host.trim().is_empty() {
                return Err(invalid(HOST, host, "must not be empty"));
            }
            config.host = Some(host.trim().to_string());
        }
        if let Some(port) = props.parse::<u16>(PORT)? {
            if port == 0 {
                return Err(invalid(PORT, "0", "must be non-zero"));
            }
            config.port = Some(port);
        }
        config.credentials = props.parse(CREDENTIALS)?;

        if let Some(ms) = props.parse::<u64>(TIMEOUT_MS)? {
            if ms == 0 {
                return Err(invalid(TIMEOUT_MS, "0", "must be greater than zero"));
            }
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(size) = props.parse::<usize>(POOL_SIZE)? {
            if size == 0 {
                return Err(invalid(POOL_SIZE, "0", "must be greater than zero"));
            }
            config.pool_size = size;
        }
        if let Some(retries) = props.parse(MAX_RETRIES)? {
            config.max_retries = retries;
        }
        if let Some(ms) = props.parse::<u64>(RETRY_BACKOFF_MS)? {
            config.retry_backoff = Duration::from_millis(ms);
        }
        config.path = props.get(PATH).map(PathBuf::from);
        if let Some(len) = props.parse::<usize>(MAX_KEY_LENGTH)? {
            if len == 0 {
                return Err(invalid(MAX_KEY_LENGTH, "0", "must be greater than zero"));
            }
            config.max_key_length = len;
        }
        if let Some(bytes) = props.parse(MAX_FIELD_BYTES)? {
            config.max_field_bytes = bytes;
        }

        Ok(config)
    }

    /// Fail with [`ConfigError::Missing`] for the first option in `options`
    /// that was not supplied. Options with defaults are always present.
    pub fn require(&self, options: &[&str]) -> Result<(), ConfigError> {
        for &option in options {
            let present = match option {
                HOST => self.host.is_some(),
                PORT => self.port.is_some(),
                CREDENTIALS => self.credentials.is_some(),
                PATH => self.path.is_some(),
                _ => true,
            };
            if !present {
                return Err(ConfigError::Missing(option.to_string()));
            }
        }
        Ok(())
    }

    /// `host:port`, when both are configured.
    pub fn endpoint(&self) -> Option<String> {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => Some(format!("{host}:{port}")),
            _ => None,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            credentials: None,
            timeout: Self::DEFAULT_TIMEOUT,
            pool_size: Self::DEFAULT_POOL_SIZE,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            retry_backoff: Self::DEFAULT_RETRY_BACKOFF,
            path: None,
            max_key_length: Self::DEFAULT_MAX_KEY_LENGTH,
            max_field_bytes: Self::DEFAULT_MAX_FIELD_BYTES,
        }
    }
}

fn invalid(option: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        option: option.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
