//! Access evaluation: which subjects hold which capabilities on which resources.

pub mod actions;
pub mod batch;
pub mod cache;
pub mod rate_limit;
pub mod simulator;

pub use actions::{ServiceActions, capabilities, is_evaluated, service_actions};
pub use batch::{AccessError, BatchCaller, BatchOutcome, BatchTuning, SubjectFailure};
pub use cache::{AccessCache, AccessCacheRecord, jitter_ttl};
pub use rate_limit::MinIntervalLimiter;
pub use simulator::{
    EvaluationResult, PolicySimulator, SimulationError, SimulationPage, SimulationRequest,
};
