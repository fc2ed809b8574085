//! Batched, rate-limited, retrying evaluation of which subjects can access which resources.
//!
//! One [`BatchCaller`] serves one account. For each batch of resources it consults the
//! [`AccessCache`], groups what is left by service, and fans out one call chain per subject on
//! a bounded worker pool. Each chain pages through the simulator, waiting on its own
//! [`MinIntervalLimiter`] before every call and retrying transient errors. A failing subject
//! is reported and contributes nothing; the other subjects' results are kept.

use crossbeam_channel::{RecvTimeoutError, unbounded};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::actions::{capabilities, is_evaluated, service_actions};
use super::cache::AccessCache;
use super::rate_limit::MinIntervalLimiter;
use super::simulator::{PolicySimulator, SimulationError, SimulationPage, SimulationRequest};
use crate::monitor::{Counters, Metrics, metric_name};
use crate::{AccessGrant, GrantMap, Opts, Resource, Subject};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("{account}: access evaluation timed out after {secs}s with {pending} subjects pending")]
    Timeout {
        account: String,
        secs: u64,
        pending: usize,
    },
    #[error("failed to build access worker pool: {0}")]
    Pool(String),
}

/// Call sizing, pacing and retry settings.
#[derive(Clone, Debug)]
pub struct BatchTuning {
    pub batch_size: usize,
    pub max_items: usize,
    pub max_workers: usize,
    pub rate_limit: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub fan_out_timeout: Duration,
}

impl BatchTuning {
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            batch_size: opts.batch_size.max(1),
            max_items: opts.max_items,
            max_workers: opts.max_workers.max(1),
            rate_limit: opts.rate_limit,
            retries: opts.retries,
            retry_delay: opts.retry_delay,
            fan_out_timeout: opts.fan_out_timeout,
        }
    }
}

impl Default for BatchTuning {
    fn default() -> Self {
        Self::from_opts(&Opts::default())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectFailure {
    pub subject_id: String,
    pub error: SimulationError,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// One entry per input resource.
    pub grants: GrantMap,
    pub failures: Vec<SubjectFailure>,
    /// Resources answered from the cache.
    pub cached: usize,
    /// Resources sent for evaluation.
    pub evaluated: usize,
}

/// `(service, resource ids, actions)` evaluated per subject.
struct ServiceGroup {
    service: String,
    resource_ids: Vec<String>,
    actions: Vec<String>,
}

/// Shared state of one fan-out, moved into every subject chain.
struct ChainContext {
    account_id: String,
    simulator: Arc<dyn PolicySimulator>,
    counters: Arc<Counters>,
    tuning: BatchTuning,
    groups: Vec<ServiceGroup>,
    /// Set when the fan-out times out; chains stop before their next call.
    cancelled: AtomicBool,
}

/// Allowed actions per resource id for one subject.
type AllowedActions = HashMap<String, Vec<String>>;

impl ChainContext {
    fn count(&self, name: &str, n: u64) {
        self.counters
            .counter(&metric_name(&self.account_id, name))
            .add(n);
    }

    fn evaluate_subject(&self, subject: &Subject) -> Result<AllowedActions, SimulationError> {
        let limiter = MinIntervalLimiter::new(self.tuning.rate_limit);
        let mut allowed: AllowedActions = HashMap::new();
        for group in &self.groups {
            for chunk in group.resource_ids.chunks(self.tuning.batch_size) {
                let mut request = SimulationRequest {
                    subject_id: subject.id.clone(),
                    actions: group.actions.clone(),
                    resource_ids: chunk.to_vec(),
                    max_items: self.tuning.max_items,
                    marker: None,
                };
                loop {
                    let page = match self.call_with_retry(&limiter, &request) {
                        Ok(page) => page,
                        Err(SimulationError::NoSuchEntity(msg)) => {
                            info!(
                                "{}: subject {} no longer exists ({}), treating as no access",
                                self.account_id, subject.id, msg
                            );
                            return Ok(HashMap::new());
                        }
                        Err(e) => return Err(e),
                    };
                    for result in page.results.into_iter().filter(|r| r.allowed) {
                        allowed
                            .entry(result.resource_id)
                            .or_default()
                            .push(result.action);
                    }
                    match page.marker {
                        Some(marker) => request.marker = Some(marker),
                        None => break,
                    }
                }
            }
            debug!(
                "{}: subject {} evaluated for {} {} resources",
                self.account_id,
                subject.id,
                group.resource_ids.len(),
                group.service
            );
        }
        Ok(allowed)
    }

    fn call_with_retry(
        &self,
        limiter: &MinIntervalLimiter,
        request: &SimulationRequest,
    ) -> Result<SimulationPage, SimulationError> {
        let mut attempt = 0;
        loop {
            if self.cancelled.load(Ordering::Relaxed) {
                return Err(SimulationError::Cancelled(format!(
                    "subject {} abandoned after fan-out timeout",
                    request.subject_id
                )));
            }
            limiter.wait();
            self.count(Metrics::API_CALLS, 1);
            match self.simulator.simulate(request) {
                Ok(page) => {
                    self.count(Metrics::API_EVALUATIONS, page.results.len() as u64);
                    return Ok(page);
                }
                Err(e) => {
                    self.count(Metrics::API_ERRORS, 1);
                    if e.is_transient() && attempt < self.tuning.retries {
                        attempt += 1;
                        warn!(
                            "{}: subject {}: {} (retry {}/{} in {:?})",
                            self.account_id,
                            request.subject_id,
                            e,
                            attempt,
                            self.tuning.retries,
                            self.tuning.retry_delay
                        );
                        std::thread::sleep(self.tuning.retry_delay);
                        continue;
                    }
                    return Err(e);
                }
            }
        }
    }
}

pub struct BatchCaller {
    account_id: String,
    simulator: Arc<dyn PolicySimulator>,
    cache: Option<AccessCache>,
    counters: Arc<Counters>,
    tuning: BatchTuning,
    pool: rayon::ThreadPool,
    disable_simulation: bool,
    cache_writes: bool,
    log_observations: bool,
}

impl BatchCaller {
    /// `cache: None` disables cache lookups and write-back.
    pub fn new(
        account_id: &str,
        simulator: Arc<dyn PolicySimulator>,
        cache: Option<AccessCache>,
        counters: Arc<Counters>,
        tuning: BatchTuning,
    ) -> Result<Self, AccessError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(tuning.max_workers)
            .thread_name({
                let account = account_id.to_string();
                move |i| format!("access-{account}-{i}")
            })
            .build()
            .map_err(|e| AccessError::Pool(e.to_string()))?;
        Ok(Self {
            account_id: account_id.to_string(),
            simulator,
            cache,
            counters,
            tuning,
            pool,
            disable_simulation: false,
            cache_writes: true,
            log_observations: false,
        })
    }

    /// Apply the run flags: simulation off, dry run (no cache writes), observation logging.
    pub fn with_opts(mut self, opts: &Opts) -> Self {
        self.disable_simulation = opts.disable_access_simulation;
        self.cache_writes = !opts.dry_run;
        self.log_observations = opts.log_access_observations;
        self
    }

    fn count(&self, name: &str, n: u64) {
        self.counters
            .counter(&metric_name(&self.account_id, name))
            .add(n);
    }

    /// Cached grants per resource; the rest is returned for evaluation.
    fn lookup_cache<'a>(
        &self,
        resources: &'a [Resource],
        grants: &mut GrantMap,
    ) -> Vec<&'a Resource> {
        let Some(ref cache) = self.cache else {
            return resources.iter().collect();
        };
        let mut uncached = Vec::new();
        for resource in resources {
            self.count(Metrics::CACHE_GET, 1);
            match cache.get(resource.id()) {
                Ok(Some(cached)) => {
                    self.count(Metrics::CACHE_HIT, 1);
                    grants.insert(resource.id().to_string(), cached);
                }
                Ok(None) => {
                    self.count(Metrics::CACHE_MISS, 1);
                    uncached.push(resource);
                }
                Err(e) => {
                    self.count(Metrics::CACHE_MISS, 1);
                    warn!(
                        "{}: access cache read failed for {}: {:#}",
                        self.account_id,
                        resource.id(),
                        e
                    );
                    uncached.push(resource);
                }
            }
        }
        uncached
    }

    /// Evaluate `resources` for every subject. Returns an entry for every resource.
    pub fn evaluate(
        &self,
        subjects: &[Subject],
        resources: &[Resource],
    ) -> Result<BatchOutcome, AccessError> {
        let mut outcome = BatchOutcome::default();
        for resource in resources {
            outcome.grants.insert(resource.id().to_string(), Vec::new());
        }
        let uncached = self.lookup_cache(resources, &mut outcome.grants);
        outcome.cached = resources.len() - uncached.len();

        let mut by_service: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for resource in &uncached {
            if is_evaluated(resource.service()) {
                by_service
                    .entry(resource.service())
                    .or_default()
                    .push(resource.id().to_string());
            }
        }
        outcome.evaluated = by_service.values().map(Vec::len).sum();

        if !by_service.is_empty() && !subjects.is_empty() && !self.disable_simulation {
            let services: HashMap<String, String> = by_service
                .iter()
                .flat_map(|(svc, ids)| ids.iter().map(|id| (id.clone(), svc.to_string())))
                .collect();
            let groups = by_service
                .into_iter()
                .filter_map(|(service, resource_ids)| {
                    service_actions(service).map(|a| ServiceGroup {
                        service: service.to_string(),
                        resource_ids,
                        actions: a.all(),
                    })
                })
                .collect();
            let allowed = self.fan_out(subjects, groups, &mut outcome.failures)?;
            self.merge_grants(allowed, &services, &mut outcome.grants);

            if outcome.failures.is_empty() {
                self.write_back(&services, &outcome.grants);
            } else {
                warn!(
                    "{}: {} subjects failed, not caching this batch",
                    self.account_id,
                    outcome.failures.len()
                );
            }
        }

        let observed: usize = outcome.grants.values().map(Vec::len).sum();
        self.count(Metrics::RESOURCES_PROCESSED, resources.len() as u64);
        self.count(Metrics::ACCESS_OBSERVED, observed as u64);
        if self.log_observations {
            for grant in outcome.grants.values().flatten() {
                info!(
                    "{}: {} -> {} {:?}",
                    self.account_id, grant.principal_id, grant.resource_id, grant.capabilities
                );
            }
        }
        Ok(outcome)
    }

    /// Run one chain per subject on the pool and wait for all of them up to the fan-out timeout.
    ///
    /// On timeout the chains are cancelled: a call already in flight finishes, but no chain
    /// makes another call or retry, and chains still queued on the pool return at once.
    fn fan_out(
        &self,
        subjects: &[Subject],
        groups: Vec<ServiceGroup>,
        failures: &mut Vec<SubjectFailure>,
    ) -> Result<Vec<(String, AllowedActions)>, AccessError> {
        let ctx = Arc::new(ChainContext {
            account_id: self.account_id.clone(),
            simulator: Arc::clone(&self.simulator),
            counters: Arc::clone(&self.counters),
            tuning: self.tuning.clone(),
            groups,
            cancelled: AtomicBool::new(false),
        });
        let (tx, rx) = unbounded();
        for subject in subjects {
            let ctx = Arc::clone(&ctx);
            let tx = tx.clone();
            let subject = subject.clone();
            self.pool.spawn(move || {
                let result = ctx.evaluate_subject(&subject);
                let _ = tx.send((subject.id, result));
            });
        }
        drop(tx);

        let deadline = Instant::now() + self.tuning.fan_out_timeout;
        let mut allowed = Vec::with_capacity(subjects.len());
        for received in 0..subjects.len() {
            match rx.recv_deadline(deadline) {
                Ok((subject_id, Ok(actions))) => allowed.push((subject_id, actions)),
                Ok((subject_id, Err(error))) => {
                    error!(
                        "{}: access evaluation failed for subject {}: {}",
                        self.account_id, subject_id, error
                    );
                    failures.push(SubjectFailure { subject_id, error });
                }
                Err(RecvTimeoutError::Timeout) => {
                    ctx.cancelled.store(true, Ordering::Relaxed);
                    return Err(AccessError::Timeout {
                        account: self.account_id.clone(),
                        secs: self.tuning.fan_out_timeout.as_secs(),
                        pending: subjects.len() - received,
                    });
                }
                Err(RecvTimeoutError::Disconnected) => {
                    error!(
                        "{}: {} subject chains exited without a result",
                        self.account_id,
                        subjects.len() - received
                    );
                    break;
                }
            }
        }
        Ok(allowed)
    }

    fn merge_grants(
        &self,
        allowed: Vec<(String, AllowedActions)>,
        services: &HashMap<String, String>,
        grants: &mut GrantMap,
    ) {
        for (subject_id, per_resource) in allowed {
            for (resource_id, actions) in per_resource {
                let Some(service) = services.get(&resource_id) else {
                    debug!(
                        "{}: ignoring result for unrequested resource {}",
                        self.account_id, resource_id
                    );
                    continue;
                };
                let caps = capabilities(service, &actions);
                if caps.is_empty() {
                    continue;
                }
                grants
                    .entry(resource_id.clone())
                    .or_default()
                    .push(AccessGrant {
                        principal_id: subject_id.clone(),
                        resource_id,
                        capabilities: caps,
                    });
            }
        }
        for list in grants.values_mut() {
            list.sort_by(|a, b| a.principal_id.cmp(&b.principal_id));
        }
    }

    fn write_back(&self, evaluated: &HashMap<String, String>, grants: &GrantMap) {
        let Some(ref cache) = self.cache else {
            return;
        };
        if !self.cache_writes {
            return;
        }
        for resource_id in evaluated.keys() {
            let Some(list) = grants.get(resource_id) else {
                continue;
            };
            match cache.put(resource_id, list) {
                Ok(true) => self.count(Metrics::CACHE_ADD, 1),
                Ok(false) => {}
                Err(e) => warn!(
                    "{}: access cache write failed for {}: {:#}",
                    self.account_id, resource_id, e
                ),
            }
        }
    }
}
