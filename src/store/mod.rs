//! Durable key/value state: metastore, access cache, and stage markers.

mod memory;
mod metastore;
mod sqlite;
mod stages;

pub use memory::MemoryStore;
pub use metastore::{Metastore, should_set_init_field};
pub use sqlite::{SqliteDb, SqliteStore};
pub use stages::{StageRecord, StageStore};

use anyhow::Result;

/// One stored record: a JSON object.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// Table names in the state database.
pub struct Tables;

impl Tables {
    pub const METASTORE: &'static str = "metastore";
    pub const ACCESS_CACHE: &'static str = "access_cache";
    pub const STAGES: &'static str = "stages";
    pub const ALL: [&'static str; 3] = [Self::METASTORE, Self::ACCESS_CACHE, Self::STAGES];
}

/// String-keyed record store shared across threads.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Record>>;
    fn put(&self, key: &str, record: &Record) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>>;

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Integer field of a record, if present.
pub(crate) fn int_field(record: &Record, field: &str) -> Option<i64> {
    record.get(field).and_then(serde_json::Value::as_i64)
}
