//! Active `(account, phase)` stages, their progress metrics, and completion notifications.

use log::{error, info};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::counters::{Metrics, metric_name};
use crate::pipeline::CompletionQueue;
use crate::store::StageStore;
use crate::{Phase, StageKey};

#[derive(Default)]
struct RegistryState {
    active: BTreeSet<StageKey>,
    started: HashMap<StageKey, Instant>,
    ended: HashMap<StageKey, Instant>,
    metrics: HashMap<StageKey, Vec<String>>,
}

pub struct StageRegistry {
    state: Mutex<RegistryState>,
    stage_store: Option<StageStore>,
    notifications: CompletionQueue<String>,
}

impl StageRegistry {
    /// `stage_store` receives a "last completed" marker per completed stage; `None` skips it.
    pub fn new(stage_store: Option<StageStore>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            stage_store,
            notifications: CompletionQueue::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `key` to the active set. Idempotent.
    pub fn start_stage(&self, key: &StageKey) {
        let mut state = self.state();
        if state.active.insert(key.clone()) {
            state.started.insert(key.clone(), Instant::now());
            state.ended.remove(key);
            info!("{}: stage started", key);
        }
    }

    /// Remove `key` from the active set, persist the completion marker, and notify the watchdog.
    /// A stage that never started (no items arrived) still gets its marker and notification.
    pub fn complete_stage(&self, key: &StageKey) {
        let duration = {
            let mut state = self.state();
            if state.active.remove(key) {
                let now = Instant::now();
                state.ended.insert(key.clone(), now);
                state.started.get(key).map(|s| now.duration_since(*s))
            } else {
                None
            }
        };
        if let Some(ref store) = self.stage_store
            && let Err(e) = store.put_completed(key)
        {
            error!("{}: failed to record stage completion: {:#}", key, e);
        }
        self.notifications.put(format!("{key}_stage_completed"));
        info!(
            "{}: stage completed in {:.1}s",
            key,
            duration.unwrap_or_default().as_secs_f64()
        );
    }

    /// Counters whose movement proves `key` is progressing.
    pub fn set_progress_metrics(&self, key: &StageKey, names: Vec<String>) {
        self.state().metrics.insert(key.clone(), names);
    }

    /// Configured metrics for `key`, else the phase default. Scan has no default: the scan phase
    /// registers one metric per scanner.
    pub fn progress_metrics(&self, key: &StageKey) -> Vec<String> {
        if let Some(names) = self.state().metrics.get(key) {
            return names.clone();
        }
        let name = match key.phase {
            Phase::Scan => return Vec::new(),
            Phase::Filter => Metrics::FILTER_EMITTED,
            Phase::AccessEvaluation => Metrics::API_CALLS,
            Phase::Registration => Metrics::DATASETS_REGISTERED,
        };
        vec![metric_name(&key.account_id, name)]
    }

    pub fn active_stages(&self) -> Vec<StageKey> {
        self.state().active.iter().cloned().collect()
    }

    pub fn is_active(&self, key: &StageKey) -> bool {
        self.state().active.contains(key)
    }

    /// Stages ever started with their running (or final) duration.
    pub fn snapshot(&self) -> Vec<(StageKey, Duration, bool)> {
        let state = self.state();
        let now = Instant::now();
        let mut out: Vec<_> = state
            .started
            .iter()
            .map(|(key, start)| {
                let end = state.ended.get(key).copied().unwrap_or(now);
                (
                    key.clone(),
                    end.duration_since(*start),
                    state.active.contains(key),
                )
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Completion notifications (`"{account}.{phase}_stage_completed"`), drained by the watchdog.
    pub fn notifications(&self) -> &CompletionQueue<String> {
        &self.notifications
    }
}
