//! Run-wide shared state and the queues linking one account's phases.

use anyhow::Result;
use std::sync::Arc;

use super::queue::CompletionQueue;
use crate::access::AccessCache;
use crate::monitor::{Counter, Counters, StageRegistry, metric_name};
use crate::store::{KvStore, MemoryStore, Metastore, SqliteDb, StageStore, Tables};
use crate::{AccessGrant, Opts, Phase, Resource, StageKey};

/// Backing stores for one run.
#[derive(Clone)]
pub struct RunStores {
    pub metastore: Arc<dyn KvStore>,
    pub access_cache: Arc<dyn KvStore>,
    pub stages: Arc<dyn KvStore>,
}

impl RunStores {
    /// All three tables in one SQLite database.
    pub fn sqlite(db: &SqliteDb) -> Result<Self> {
        Ok(Self {
            metastore: Arc::new(db.table(Tables::METASTORE)?),
            access_cache: Arc::new(db.table(Tables::ACCESS_CACHE)?),
            stages: Arc::new(db.table(Tables::STAGES)?),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            metastore: Arc::new(MemoryStore::new()),
            access_cache: Arc::new(MemoryStore::new()),
            stages: Arc::new(MemoryStore::new()),
        }
    }
}

/// Built once per run and shared by `Arc` with every phase thread and the watchdog.
pub struct RunContext {
    pub opts: Opts,
    pub registry: Arc<StageRegistry>,
    pub counters: Arc<Counters>,
    pub metastore: Metastore,
    pub stage_store: StageStore,
    cache_store: Arc<dyn KvStore>,
}

impl RunContext {
    pub fn new(opts: Opts, stores: RunStores) -> Arc<Self> {
        let stage_store = StageStore::new(stores.stages);
        Arc::new(Self {
            registry: Arc::new(StageRegistry::new(Some(stage_store.clone()))),
            counters: Arc::new(Counters::new()),
            metastore: Metastore::new(stores.metastore, opts.dry_run),
            stage_store,
            cache_store: stores.access_cache,
            opts,
        })
    }

    /// Access cache for `account_id` with its TTL, or `None` when disabled.
    pub fn access_cache(&self, account_id: &str) -> Option<AccessCache> {
        if self.opts.disable_access_cache {
            return None;
        }
        Some(AccessCache::new(
            Arc::clone(&self.cache_store),
            self.opts.cache_ttl_for(account_id),
            self.opts.cache_jitter_ratio,
        ))
    }

    /// Counter `{account}.{name}`.
    pub fn counter(&self, account_id: &str, name: &str) -> Counter {
        self.counters.counter(&metric_name(account_id, name))
    }

    pub fn stage(&self, account_id: &str, phase: Phase) -> StageKey {
        StageKey::new(account_id, phase)
    }
}

/// Resource with the grants evaluated for it.
pub type EvaluatedResource = (Resource, Vec<AccessGrant>);

/// Queues between one account's phases: scan -> filter -> access -> registration.
pub struct AccountQueues {
    pub scanned: Arc<CompletionQueue<Resource>>,
    pub filtered: Arc<CompletionQueue<Resource>>,
    pub evaluated: Arc<CompletionQueue<EvaluatedResource>>,
}

impl AccountQueues {
    pub fn new() -> Self {
        Self {
            scanned: Arc::new(CompletionQueue::new()),
            filtered: Arc::new(CompletionQueue::new()),
            evaluated: Arc::new(CompletionQueue::new()),
        }
    }
}

impl Default for AccountQueues {
    fn default() -> Self {
        Self::new()
    }
}
