//! Liveness watchdog: samples progress counters on a fixed interval and terminates the
//! process when an active stage stops moving, or when nothing has been active for too long.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::counters::Counters;
use super::registry::StageRegistry;
use crate::utils::config::EXIT_TEMPFAIL;
use crate::{Opts, Phase, StageKey};

/// Called with the reason when the watchdog gives up. The production hook exits the process.
pub type TerminationHook = Box<dyn Fn(&str) + Send + Sync>;

/// Exit with EX_TEMPFAIL without unwinding.
pub fn exit_tempfail(reason: &str) {
    error!("watchdog terminating process: {}", reason);
    std::process::exit(EXIT_TEMPFAIL);
}

/// Last observed value of a metric and when it was first seen at that value.
pub type ProgressSamples = HashMap<String, (Instant, u64)>;

#[derive(Clone, Debug)]
pub struct WatchdogConfig {
    pub interval: Duration,
    pub default_timeout: Duration,
    pub phase_timeouts: HashMap<Phase, Duration>,
}

impl WatchdogConfig {
    pub fn from_opts(opts: &Opts) -> Self {
        Self {
            interval: opts.monitor_interval,
            default_timeout: opts.default_stage_timeout,
            phase_timeouts: opts.stage_timeouts.clone(),
        }
    }

    pub fn timeout(&self, phase: Phase) -> Duration {
        self.phase_timeouts
            .get(&phase)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageHealth {
    /// At least one tracked metric moved within the timeout (or nothing is tracked yet).
    Progressing,
    /// Some, not all, tracked metrics are stalled.
    PartiallyStalled(Vec<String>),
    Stalled,
}

/// Stall check for one stage. A metric is stalled iff it has a prior sample, its current value
/// equals that sample, and the sample is older than `timeout`. Metrics without a sample or a
/// current value are not stalled. A stage with no metrics is never stalled.
pub fn evaluate_stage(
    metrics: &[String],
    samples: &ProgressSamples,
    current: &HashMap<String, u64>,
    now: Instant,
    timeout: Duration,
) -> StageHealth {
    if metrics.is_empty() {
        return StageHealth::Progressing;
    }
    let stalled: Vec<String> = metrics
        .iter()
        .filter(|m| {
            let (Some((seen, prev)), Some(value)) = (samples.get(*m), current.get(*m)) else {
                return false;
            };
            prev == value && now.saturating_duration_since(*seen) > timeout
        })
        .cloned()
        .collect();
    if stalled.len() == metrics.len() {
        StageHealth::Stalled
    } else if stalled.is_empty() {
        StageHealth::Progressing
    } else {
        StageHealth::PartiallyStalled(stalled)
    }
}

/// Outcome of one watchdog pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    Fatal(String),
}

pub struct Watchdog {
    registry: Arc<StageRegistry>,
    counters: Arc<Counters>,
    config: WatchdogConfig,
    samples: ProgressSamples,
    idle_since: Option<Instant>,
    on_fatal: TerminationHook,
}

impl Watchdog {
    pub fn new(
        registry: Arc<StageRegistry>,
        counters: Arc<Counters>,
        config: WatchdogConfig,
        on_fatal: TerminationHook,
    ) -> Self {
        Self {
            registry,
            counters,
            config,
            samples: HashMap::new(),
            idle_since: None,
            on_fatal,
        }
    }

    pub fn samples(&self) -> &ProgressSamples {
        &self.samples
    }

    /// One pass at time `now`: drain notifications, judge every active stage, then sample the
    /// progress metrics of active stages.
    pub fn check(&mut self, now: Instant) -> Verdict {
        for note in self.registry.notifications().drain_now() {
            info!("watchdog: {}", note);
        }

        let current = self.counters.snapshot();
        let active = self.registry.active_stages();
        let mut verdict = self.check_idle(&active, now);

        if verdict == Verdict::Healthy {
            for stage in &active {
                if let Some(reason) = self.check_stage(stage, &current, now) {
                    verdict = Verdict::Fatal(reason);
                    break;
                }
            }
        }

        // Only active stages' metrics are sampled, so a stage's clock starts when it does.
        for name in active.iter().flat_map(|s| self.registry.progress_metrics(s)) {
            let Some(&value) = current.get(&name) else {
                continue;
            };
            match self.samples.get(&name) {
                Some((_, prev)) if *prev == value => {}
                _ => {
                    self.samples.insert(name, (now, value));
                }
            }
        }
        verdict
    }

    fn check_idle(&mut self, active: &[StageKey], now: Instant) -> Verdict {
        if !active.is_empty() {
            self.idle_since = None;
            return Verdict::Healthy;
        }
        let since = *self.idle_since.get_or_insert(now);
        let idle = now.saturating_duration_since(since);
        debug!("watchdog: no active stages for {:.0}s", idle.as_secs_f64());
        if idle > self.config.default_timeout {
            return Verdict::Fatal(format!(
                "no active stages for {:.0}s",
                idle.as_secs_f64()
            ));
        }
        Verdict::Healthy
    }

    fn check_stage(
        &self,
        stage: &StageKey,
        current: &HashMap<String, u64>,
        now: Instant,
    ) -> Option<String> {
        let metrics = self.registry.progress_metrics(stage);
        let timeout = self.config.timeout(stage.phase);
        match evaluate_stage(&metrics, &self.samples, current, now, timeout) {
            StageHealth::Progressing => None,
            StageHealth::PartiallyStalled(stalled) => {
                warn!(
                    "{}: stalled metrics {:?}, exit suppressed due to partial progress",
                    stage, stalled
                );
                None
            }
            StageHealth::Stalled => Some(format!(
                "{}: no progress on {:?} for over {}s",
                stage,
                metrics,
                timeout.as_secs()
            )),
        }
    }

    /// One pass; runs the termination hook on a fatal verdict. Returns true when fatal.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.check(now) {
            Verdict::Healthy => false,
            Verdict::Fatal(reason) => {
                error!("watchdog: {}", reason);
                (self.on_fatal)(&reason);
                true
            }
        }
    }

    /// Sample every `interval` until `shutdown` fires or disconnects, or a check is fatal.
    pub fn run(mut self, shutdown: Receiver<()>) {
        loop {
            match shutdown.recv_timeout(self.config.interval) {
                Err(RecvTimeoutError::Timeout) => {
                    if self.tick(Instant::now()) {
                        return;
                    }
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("watchdog: shutdown");
                    return;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: Receiver<()>) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || self.run(shutdown))
    }
}
