//! "Last completed" markers per `(account, stage)`, kept for two weeks.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::KvStore;
use crate::StageKey;
use crate::types::epoch_secs;
use crate::utils::config::MonitorConsts;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub account_id: String,
    pub stage: String,
    /// Completion time, epoch seconds.
    pub ts: i64,
    pub expire: i64,
}

#[derive(Clone)]
pub struct StageStore {
    store: Arc<dyn KvStore>,
    ttl_secs: i64,
}

impl StageStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            ttl_secs: MonitorConsts::STAGE_RECORD_TTL_SECS,
        }
    }

    pub fn key(account_id: &str, stage: &str) -> String {
        format!("{account_id}.{stage}")
    }

    /// Record that `stage` completed now.
    pub fn put_completed(&self, stage: &StageKey) -> Result<()> {
        self.put_completed_at(stage, epoch_secs())
    }

    pub fn put_completed_at(&self, stage: &StageKey, ts: i64) -> Result<()> {
        let record = StageRecord {
            account_id: stage.account_id.clone(),
            stage: stage.phase.as_str().to_string(),
            ts,
            expire: ts + self.ttl_secs,
        };
        let serde_json::Value::Object(map) = serde_json::to_value(&record)? else {
            return Err(anyhow!("{stage}: stage record is not an object"));
        };
        self.store.put(&stage.to_string(), &map)
    }

    /// Last completion of `stage` for `account_id`, if recorded and not expired.
    pub fn last_completed(&self, account_id: &str, stage: &str) -> Result<Option<StageRecord>> {
        self.last_completed_at(account_id, stage, epoch_secs())
    }

    pub fn last_completed_at(
        &self,
        account_id: &str,
        stage: &str,
        now: i64,
    ) -> Result<Option<StageRecord>> {
        let Some(record) = self.store.get(&Self::key(account_id, stage))? else {
            return Ok(None);
        };
        let record: StageRecord = serde_json::from_value(serde_json::Value::Object(record))?;
        Ok((now <= record.expire).then_some(record))
    }

    /// Accounts with at least one stage marker, sorted.
    pub fn accounts(&self) -> Result<Vec<String>> {
        let mut accounts: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.rsplit_once('.').map(|(account, _)| account.to_string()))
            .collect();
        accounts.sort();
        accounts.dedup();
        Ok(accounts)
    }
}
