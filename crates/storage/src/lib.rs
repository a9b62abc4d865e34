//! Document-store boundary. Records are JSON objects addressed by
//! `<collection>/<key>`; adapters exist for an in-process map, a SQLite file
//! and a realtime-database REST endpoint.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

mod memory;
mod rtdb;
mod sqlite;

pub use memory::{MemoryStore, StoreStats};
pub use rtdb::RtdbStore;
pub use sqlite::SqliteStore;

pub const USERS: &str = "users";
pub const DONATIONS: &str = "donations";

/// Characters a realtime-database key may not contain. Every adapter rejects
/// them so records stay portable between backends.
const FORBIDDEN_KEY_CHARS: &[char] = &['.', '$', '#', '[', ']', '/'];

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordPath {
    collection: String,
    key: String,
}

impl RecordPath {
    pub fn new(collection: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            key: key.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Fails with [`StoreError::InvalidKey`] unless both segments are usable
    /// as a single node name.
    pub fn check(&self) -> Result<(), StoreError> {
        check_segment(&self.collection)?;
        check_segment(&self.key).map_err(|_| StoreError::InvalidKey(self.to_string()))
    }
}

pub(crate) fn check_segment(segment: &str) -> Result<(), StoreError> {
    let forbidden = |c: char| FORBIDDEN_KEY_CHARS.contains(&c) || c.is_ascii_control();
    if segment.is_empty() || segment.contains(forbidden) {
        return Err(StoreError::InvalidKey(segment.to_string()));
    }
    Ok(())
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.key)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid record key '{0}'")]
    InvalidKey(String),
    #[error("malformed record at {path}: {message}")]
    Malformed { path: String, message: String },
}

/// Operations consumed from the remote database of record.
///
/// Writes to the same path are last-write-wins; no adapter performs conflict
/// detection. Collection reads return records ordered by key. Paths that fail
/// [`RecordPath::check`] are rejected before anything is touched.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn write(&self, path: &RecordPath, value: Value) -> Result<(), StoreError>;
    /// Sets only the given fields. A `null` field removes it.
    async fn merge(&self, path: &RecordPath, fields: Map<String, Value>) -> Result<(), StoreError>;
    async fn read(&self, path: &RecordPath) -> Result<Option<Value>, StoreError>;
    async fn delete(&self, path: &RecordPath) -> Result<(), StoreError>;
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError>;
    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError>;
}

pub(crate) fn merge_fields(existing: Option<Value>, fields: Map<String, Value>) -> Value {
    let mut record = match existing {
        Some(Value::Object(object)) => object,
        _ => Map::new(),
    };
    for (name, value) in fields {
        if value.is_null() {
            record.remove(&name);
        } else {
            record.insert(name, value);
        }
    }
    Value::Object(record)
}

pub(crate) fn field_matches(record: &Value, field: &str, value: &Value) -> bool {
    record.get(field) == Some(value)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
