//! Stage lifecycle tracking and the liveness watchdog.

pub mod counters;
pub mod registry;
pub mod watchdog;

pub use counters::{Counter, Counters, Metrics, metric_name};
pub use registry::StageRegistry;
pub use watchdog::{
    ProgressSamples, StageHealth, TerminationHook, Verdict, Watchdog, WatchdogConfig,
    evaluate_stage, exit_tempfail,
};
