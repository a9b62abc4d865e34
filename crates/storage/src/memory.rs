use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use crate::{check_segment, field_matches, merge_fields, RecordPath, RemoteStore, StoreError};

/// Call counters, used to check that reads always reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub reads: usize,
    pub writes: usize,
    pub queries: usize,
    pub scans: usize,
}

/// In-process store with switchable read/write failures.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, BTreeMap<String, Value>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reads: AtomicUsize,
    writes: AtomicUsize,
    queries: AtomicUsize,
    scans: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            reads: self.reads.load(Ordering::SeqCst),
            writes: self.writes.load(Ordering::SeqCst),
            queries: self.queries.load(Ordering::SeqCst),
            scans: self.scans.load(Ordering::SeqCst),
        }
    }

    fn check_read(&self, counter: &AtomicUsize) -> Result<(), StoreError> {
        counter.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("injected read failure".into()));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("injected write failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn write(&self, path: &RecordPath, value: Value) -> Result<(), StoreError> {
        path.check()?;
        self.check_write()?;
        self.collections
            .write()
            .await
            .entry(path.collection().to_string())
            .or_default()
            .insert(path.key().to_string(), value);
        Ok(())
    }

    async fn merge(&self, path: &RecordPath, fields: Map<String, Value>) -> Result<(), StoreError> {
        path.check()?;
        self.check_write()?;
        let mut guard = self.collections.write().await;
        let collection = guard.entry(path.collection().to_string()).or_default();
        let existing = collection.remove(path.key());
        collection.insert(path.key().to_string(), merge_fields(existing, fields));
        Ok(())
    }

    async fn read(&self, path: &RecordPath) -> Result<Option<Value>, StoreError> {
        path.check()?;
        self.check_read(&self.reads)?;
        Ok(self
            .collections
            .read()
            .await
            .get(path.collection())
            .and_then(|records| records.get(path.key()))
            .cloned())
    }

    async fn delete(&self, path: &RecordPath) -> Result<(), StoreError> {
        path.check()?;
        self.check_write()?;
        if let Some(records) = self.collections.write().await.get_mut(path.collection()) {
            records.remove(path.key());
        }
        Ok(())
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Value>, StoreError> {
        check_segment(collection)?;
        self.check_read(&self.queries)?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|records| {
                records
                    .values()
                    .filter(|record| field_matches(record, field, value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        check_segment(collection)?;
        self.check_read(&self.scans)?;
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }
}
