//! Per-dataset metadata records keyed by `service/resource` (or `region/service/resource`).

use anyhow::Result;
use log::debug;
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};

use super::{KvStore, Record, int_field};
use crate::types::{Arn, epoch_secs};
use crate::utils::config::{INIT_TS_FIELD_PREFIX, SUPPLEMENTAL_FIELDS};

/// Whether writing `field` should also write its first-seen `init_` copy.
///
/// `created_at` and `refresh_at` never get one. `observed` gets none once the dataset was
/// registered. Any field gets none when it, or its init copy, is already present.
pub fn should_set_init_field(field: &str, record: &Record) -> bool {
    if matches!(field, "created_at" | "refresh_at") {
        return false;
    }
    let init_field = format!("{INIT_TS_FIELD_PREFIX}{field}");
    if record.contains_key(field) || record.contains_key(&init_field) {
        return false;
    }
    if field == "observed" {
        let init_registered = format!("{INIT_TS_FIELD_PREFIX}registered");
        if record.contains_key("registered") || record.contains_key(&init_registered) {
            return false;
        }
    }
    true
}

/// Clones share one write lock, so timestamp updates from concurrent phases never lose fields.
#[derive(Clone)]
pub struct Metastore {
    store: Arc<dyn KvStore>,
    dry_run: bool,
    write_lock: Arc<Mutex<()>>,
}

impl Metastore {
    /// `dry_run` turns every timestamp write into a no-op; reads still hit the store.
    pub fn new(store: Arc<dyn KvStore>, dry_run: bool) -> Self {
        Self {
            store,
            dry_run,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(arn: &Arn) -> String {
        format!("{}/{}", arn.service, arn.resource)
    }

    pub fn regional_key(arn: &Arn) -> String {
        format!("{}/{}/{}", arn.region, arn.service, arn.resource)
    }

    pub fn get(&self, key: &str) -> Result<Option<Record>> {
        self.store.get(key)
    }

    /// Regional record when it carries any supplemental field, else the global one.
    pub fn get_regional_or_global(&self, arn: &Arn) -> Result<Option<Record>> {
        if !arn.region.is_empty()
            && let Some(regional) = self.store.get(&Self::regional_key(arn))?
            && SUPPLEMENTAL_FIELDS.iter().any(|f| regional.contains_key(*f))
        {
            return Ok(Some(regional));
        }
        self.store.get(&Self::key(arn))
    }

    /// Set `field` to `value` (now when `None`), adding `init_{field}` on first write.
    pub fn set_timestamp(&self, key: &str, field: &str, value: Option<i64>) -> Result<()> {
        if self.dry_run {
            debug!("dry run: skip {key}.{field}");
            return Ok(());
        }
        let value = value.unwrap_or_else(epoch_secs);
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.store.get(key)?.unwrap_or_default();
        if should_set_init_field(field, &record) {
            record.insert(format!("{INIT_TS_FIELD_PREFIX}{field}"), Value::from(value));
        }
        record.insert(field.to_string(), Value::from(value));
        self.store.put(key, &record)
    }

    pub fn set_created_at(&self, key: &str, ts: i64) -> Result<()> {
        self.set_timestamp(key, "created_at", Some(ts))
    }

    pub fn set_observed(&self, key: &str) -> Result<()> {
        self.set_timestamp(key, "observed", None)
    }

    pub fn set_refresh_at(&self, key: &str, ts: i64) -> Result<()> {
        self.set_timestamp(key, "refresh_at", Some(ts))
    }

    pub fn set_registered(&self, key: &str) -> Result<()> {
        self.set_timestamp(key, "registered", None)
    }

    pub fn registered(record: &Record) -> Option<i64> {
        int_field(record, "registered")
    }

    pub fn refresh_at(record: &Record) -> Option<i64> {
        int_field(record, "refresh_at")
    }
}
