//! TTL cache of evaluated grants, keyed by resource id.

use anyhow::Result;
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::AccessGrant;
use crate::store::KvStore;
use crate::types::epoch_secs;

/// Random TTL within `[ttl - ttl * ratio, ttl]` so entries written together do not expire together.
pub fn jitter_ttl(ttl: i64, ratio: f64) -> i64 {
    if ttl <= 0 || ratio <= 0.0 {
        return ttl;
    }
    let min = ttl - (ttl as f64 * ratio.min(1.0)) as i64;
    rand::thread_rng().gen_range(min..=ttl)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AccessCacheRecord {
    pub grants: Vec<AccessGrant>,
    /// Epoch seconds after which the record is ignored.
    pub expire: i64,
}

#[derive(Clone)]
pub struct AccessCache {
    store: Arc<dyn KvStore>,
    ttl_secs: i64,
    jitter_ratio: f64,
}

impl AccessCache {
    pub fn new(store: Arc<dyn KvStore>, ttl_secs: i64, jitter_ratio: f64) -> Self {
        Self {
            store,
            ttl_secs,
            jitter_ratio,
        }
    }

    fn record_at(&self, resource_id: &str, now: i64) -> Result<Option<AccessCacheRecord>> {
        let Some(raw) = self.store.get(resource_id)? else {
            return Ok(None);
        };
        let record: AccessCacheRecord = serde_json::from_value(serde_json::Value::Object(raw))?;
        Ok((now <= record.expire).then_some(record))
    }

    pub fn get(&self, resource_id: &str) -> Result<Option<Vec<AccessGrant>>> {
        self.get_at(resource_id, epoch_secs())
    }

    /// Grants for `resource_id` when a non-empty, unexpired record exists.
    pub fn get_at(&self, resource_id: &str, now: i64) -> Result<Option<Vec<AccessGrant>>> {
        Ok(self
            .record_at(resource_id, now)?
            .map(|r| r.grants)
            .filter(|g| !g.is_empty()))
    }

    pub fn put(&self, resource_id: &str, grants: &[AccessGrant]) -> Result<bool> {
        self.put_at(resource_id, grants, epoch_secs())
    }

    /// Write `grants` unless a valid record already exists (first write wins). Empty grant lists
    /// are not stored. Returns whether a record was written.
    pub fn put_at(&self, resource_id: &str, grants: &[AccessGrant], now: i64) -> Result<bool> {
        if grants.is_empty() || self.record_at(resource_id, now)?.is_some() {
            return Ok(false);
        }
        let record = AccessCacheRecord {
            grants: grants.to_vec(),
            expire: now + jitter_ttl(self.ttl_secs, self.jitter_ratio),
        };
        let serde_json::Value::Object(map) = serde_json::to_value(&record)? else {
            return Ok(false);
        };
        self.store.put(resource_id, &map)?;
        debug!("access cache: stored {} grants for {}", grants.len(), resource_id);
        Ok(true)
    }
}
