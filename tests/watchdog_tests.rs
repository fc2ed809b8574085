//! Watchdog stall detection, partial-progress suppression, idle detection, and the run loop.

use crossbeam_channel::bounded;
use grantmap::monitor::{
    Counters, Metrics, ProgressSamples, StageHealth, StageRegistry, Verdict, Watchdog,
    WatchdogConfig, evaluate_stage, metric_name,
};
use grantmap::{Phase, StageKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const ACCT: &str = "123";

fn config() -> WatchdogConfig {
    WatchdogConfig {
        interval: Duration::from_secs(120),
        default_timeout: Duration::from_secs(1200),
        phase_timeouts: HashMap::from([(Phase::Registration, Duration::from_secs(7200))]),
    }
}

/// Watchdog plus the reasons passed to its termination hook.
fn watchdog(
    config: WatchdogConfig,
) -> (
    Watchdog,
    Arc<StageRegistry>,
    Arc<Counters>,
    Arc<Mutex<Vec<String>>>,
) {
    let registry = Arc::new(StageRegistry::new(None));
    let counters = Arc::new(Counters::new());
    let reasons = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reasons);
    let dog = Watchdog::new(
        Arc::clone(&registry),
        Arc::clone(&counters),
        config,
        Box::new(move |r: &str| sink.lock().unwrap().push(r.to_string())),
    );
    (dog, registry, counters, reasons)
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

// --- evaluate_stage ---

#[test]
fn test_evaluate_no_metrics_never_stalls() {
    let now = Instant::now();
    let health = evaluate_stage(&[], &HashMap::new(), &HashMap::new(), now, secs(0));
    assert_eq!(health, StageHealth::Progressing);
}

#[test]
fn test_evaluate_metric_without_sample_not_stalled() {
    let t0 = Instant::now();
    let metrics = vec!["a".to_string()];
    let current = HashMap::from([("a".to_string(), 5)]);
    let health = evaluate_stage(&metrics, &HashMap::new(), &current, t0 + secs(9999), secs(1));
    assert_eq!(health, StageHealth::Progressing);
}

#[test]
fn test_evaluate_all_stalled_vs_partial() {
    let t0 = Instant::now();
    let metrics = vec!["a".to_string(), "b".to_string()];
    let samples: ProgressSamples =
        HashMap::from([("a".to_string(), (t0, 1)), ("b".to_string(), (t0, 1))]);

    let same = HashMap::from([("a".to_string(), 1), ("b".to_string(), 1)]);
    assert_eq!(
        evaluate_stage(&metrics, &samples, &same, t0 + secs(11), secs(10)),
        StageHealth::Stalled
    );

    let one_moved = HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]);
    assert_eq!(
        evaluate_stage(&metrics, &samples, &one_moved, t0 + secs(11), secs(10)),
        StageHealth::PartiallyStalled(vec!["a".to_string()])
    );
}

#[test]
fn test_evaluate_timeout_is_strict() {
    let t0 = Instant::now();
    let metrics = vec!["a".to_string()];
    let samples: ProgressSamples = HashMap::from([("a".to_string(), (t0, 3))]);
    let current = HashMap::from([("a".to_string(), 3)]);
    assert_eq!(
        evaluate_stage(&metrics, &samples, &current, t0 + secs(10), secs(10)),
        StageHealth::Progressing
    );
}

// --- Watchdog::check ---

#[test]
fn test_progressing_stage_is_healthy() {
    let (mut dog, registry, counters, _) = watchdog(config());
    let stage = StageKey::new(ACCT, Phase::Filter);
    let emitted = metric_name(ACCT, Metrics::FILTER_EMITTED);
    registry.start_stage(&stage);
    counters.counter(&emitted);

    let t0 = Instant::now();
    assert_eq!(dog.check(t0), Verdict::Healthy);
    counters.incr(&emitted);
    assert_eq!(dog.check(t0 + secs(2000)), Verdict::Healthy);
    assert_eq!(dog.samples()[&emitted], (t0 + secs(2000), 1));
    assert_eq!(dog.check(t0 + secs(2100)), Verdict::Healthy);
}

#[test]
fn test_stalled_stage_is_fatal() {
    let (mut dog, registry, counters, reasons) = watchdog(config());
    let stage = StageKey::new(ACCT, Phase::Filter);
    registry.start_stage(&stage);
    counters.counter(&metric_name(ACCT, Metrics::FILTER_EMITTED));

    let t0 = Instant::now();
    assert!(!dog.tick(t0));
    assert!(!dog.tick(t0 + secs(1200)));
    assert!(dog.tick(t0 + secs(1201)));

    let reasons = reasons.lock().unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("123.filter"), "{}", reasons[0]);
}

#[test]
fn test_samples_keep_first_seen_time_while_unchanged() {
    let (mut dog, registry, counters, _) = watchdog(config());
    registry.start_stage(&StageKey::new(ACCT, Phase::Filter));
    let emitted = metric_name(ACCT, Metrics::FILTER_EMITTED);
    counters.counter(&emitted);

    let t0 = Instant::now();
    dog.check(t0);
    dog.check(t0 + secs(600));
    assert_eq!(dog.samples()[&emitted], (t0, 0));
    assert!(matches!(dog.check(t0 + secs(1300)), Verdict::Fatal(_)));
}

#[test]
fn test_inactive_stage_metrics_are_not_sampled() {
    let (mut dog, registry, counters, _) = watchdog(config());
    let stage = StageKey::new(ACCT, Phase::Filter);
    let emitted = metric_name(ACCT, Metrics::FILTER_EMITTED);
    counters.counter(&emitted);

    // Counter exists long before its stage starts.
    let t0 = Instant::now();
    assert_eq!(dog.check(t0), Verdict::Healthy);
    assert!(!dog.samples().contains_key(&emitted));

    registry.start_stage(&stage);
    assert_eq!(dog.check(t0 + secs(1200)), Verdict::Healthy);
    assert_eq!(dog.samples()[&emitted], (t0 + secs(1200), 0));
    assert_eq!(dog.check(t0 + secs(1320)), Verdict::Healthy);
    assert!(matches!(dog.check(t0 + secs(2401)), Verdict::Fatal(_)));
}

#[test]
fn test_partial_progress_suppresses_exit() {
    let (mut dog, registry, counters, _) = watchdog(config());
    let stage = StageKey::new(ACCT, Phase::AccessEvaluation);
    let calls = metric_name(ACCT, Metrics::API_CALLS);
    let processed = metric_name(ACCT, Metrics::RESOURCES_PROCESSED);
    registry.start_stage(&stage);
    registry.set_progress_metrics(&stage, vec![calls.clone(), processed.clone()]);
    counters.counter(&calls);
    counters.counter(&processed);

    let t0 = Instant::now();
    dog.check(t0);
    // Cache hits: resources move, API calls do not.
    counters.incr(&processed);
    assert_eq!(dog.check(t0 + secs(1500)), Verdict::Healthy);
    // Nothing moves for another timeout: both stalled.
    assert!(matches!(dog.check(t0 + secs(2800)), Verdict::Fatal(_)));
}

#[test]
fn test_phase_timeout_override() {
    let (mut dog, registry, counters, _) = watchdog(config());
    registry.start_stage(&StageKey::new(ACCT, Phase::Registration));
    counters.counter(&metric_name(ACCT, Metrics::DATASETS_REGISTERED));

    let t0 = Instant::now();
    dog.check(t0);
    assert_eq!(dog.check(t0 + secs(5000)), Verdict::Healthy);
    assert!(matches!(dog.check(t0 + secs(7201)), Verdict::Fatal(_)));
}

#[test]
fn test_stage_without_metrics_never_stalls() {
    let (mut dog, registry, _, _) = watchdog(config());
    registry.start_stage(&StageKey::new(ACCT, Phase::Scan));

    let t0 = Instant::now();
    dog.check(t0);
    assert_eq!(dog.check(t0 + secs(100_000)), Verdict::Healthy);
}

#[test]
fn test_uncreated_counter_never_stalls() {
    let (mut dog, registry, _, _) = watchdog(config());
    registry.start_stage(&StageKey::new(ACCT, Phase::Filter));

    let t0 = Instant::now();
    dog.check(t0);
    assert_eq!(dog.check(t0 + secs(100_000)), Verdict::Healthy);
}

#[test]
fn test_idle_beyond_default_timeout_is_fatal() {
    let (mut dog, registry, _, _) = watchdog(config());
    let t0 = Instant::now();
    assert_eq!(dog.check(t0), Verdict::Healthy);
    assert_eq!(dog.check(t0 + secs(1200)), Verdict::Healthy);

    // Activity resets the idle clock.
    let stage = StageKey::new(ACCT, Phase::Scan);
    registry.start_stage(&stage);
    assert_eq!(dog.check(t0 + secs(1201)), Verdict::Healthy);
    registry.complete_stage(&stage);
    assert_eq!(dog.check(t0 + secs(1300)), Verdict::Healthy);
    assert_eq!(dog.check(t0 + secs(2400)), Verdict::Healthy);
    assert!(matches!(dog.check(t0 + secs(2501)), Verdict::Fatal(_)));
}

#[test]
fn test_check_drains_completion_notifications() {
    let (mut dog, registry, _, _) = watchdog(config());
    let stage = StageKey::new(ACCT, Phase::Scan);
    registry.start_stage(&stage);
    registry.complete_stage(&stage);
    assert_eq!(registry.notifications().len(), 1);
    dog.check(Instant::now());
    assert!(registry.notifications().is_empty());
}

// --- run loop ---

#[test]
fn test_run_exits_on_shutdown() {
    let (dog, _, _, reasons) = watchdog(config());
    let (tx, rx) = bounded(1);
    let handle = dog.spawn(rx).unwrap();
    tx.send(()).unwrap();
    handle.join().unwrap();
    assert!(reasons.lock().unwrap().is_empty());
}

#[test]
fn test_run_exits_when_sender_dropped() {
    let (dog, _, _, _) = watchdog(config());
    let (tx, rx) = bounded::<()>(1);
    let handle = dog.spawn(rx).unwrap();
    drop(tx);
    handle.join().unwrap();
}

#[test]
fn test_run_invokes_hook_when_idle() {
    let (dog, _, _, reasons) = watchdog(WatchdogConfig {
        interval: Duration::from_millis(5),
        default_timeout: Duration::from_millis(20),
        phase_timeouts: HashMap::new(),
    });
    let (_tx, rx) = bounded::<()>(1);
    let handle = dog.spawn(rx).unwrap();
    handle.join().unwrap();
    let reasons = reasons.lock().unwrap();
    assert_eq!(reasons.len(), 1);
    assert!(reasons[0].contains("no active stages"));
}
