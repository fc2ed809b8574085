use anyhow::Result;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{KvStore, Record};

/// In-memory [`KvStore`] for tests and throwaway runs.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, Record>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, BTreeMap<String, Record>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Record>> {
        Ok(self.records().get(key).cloned())
    }

    fn put(&self, key: &str, record: &Record) -> Result<()> {
        self.records().insert(key.to_string(), record.clone());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.records().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records().keys().cloned().collect())
    }
}
