//! Named monotonic progress counters, shared by phases and sampled by the watchdog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Counter names, scoped per account with [`metric_name`].
pub struct Metrics;

impl Metrics {
    pub const FILTER_EMITTED: &'static str = "resource_filter.emitted";
    pub const FILTER_EXCLUDED: &'static str = "resource_filter.excluded";
    pub const FILTER_ERRORS: &'static str = "resource_filter.errors";
    pub const API_CALLS: &'static str = "access_simulation_api_calls";
    pub const API_ERRORS: &'static str = "access_simulation_api_errors";
    pub const API_EVALUATIONS: &'static str = "access_simulation_api_evaluations";
    pub const RESOURCES_PROCESSED: &'static str = "resource_access_processed";
    pub const ACCESS_OBSERVED: &'static str = "observed_resource_accesses";
    pub const CACHE_GET: &'static str = "access_cache_get";
    pub const CACHE_HIT: &'static str = "access_cache_hit";
    pub const CACHE_MISS: &'static str = "access_cache_miss";
    pub const CACHE_ADD: &'static str = "access_cache_add";
    pub const DATASETS_REGISTERED: &'static str = "registrar.datasets_registered";
    pub const REGISTRATION_ERRORS: &'static str = "registrar.registration_errors";
    pub const ACCESS_REGISTERED: &'static str = "registrar.access_registered";

    /// `{scanner}.observed`: resources emitted by one scanner.
    pub fn observed(scanner: &str) -> String {
        format!("{scanner}.observed")
    }

    pub fn observe_errors(scanner: &str) -> String {
        format!("{scanner}.observe_errors")
    }
}

/// `{account}.{name}`
pub fn metric_name(account_id: &str, name: &str) -> String {
    format!("{account_id}.{name}")
}

/// Handle to one counter. Cloning shares the value.
#[derive(Clone, Debug, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
pub struct Counters {
    map: RwLock<HashMap<String, Counter>>,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter `name`.
    pub fn counter(&self, name: &str) -> Counter {
        if let Some(c) = self
            .map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return c.clone();
        }
        self.map
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    pub fn incr(&self, name: &str) {
        self.counter(name).incr();
    }

    /// Current value, `None` if the counter was never created.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(Counter::get)
    }

    /// Point-in-time values of every counter.
    pub fn snapshot(&self) -> HashMap<String, u64> {
        self.map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, c)| (k.clone(), c.get()))
            .collect()
    }
}
