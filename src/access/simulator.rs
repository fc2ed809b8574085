//! Contract of the remote policy-simulation service.

use serde::{Deserialize, Serialize};

/// Failures of one simulation call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("throttled: {0}")]
    Throttled(String),
    #[error("connection closed: {0}")]
    Connection(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    /// The subject no longer exists; it holds no access.
    #[error("no such entity: {0}")]
    NoSuchEntity(String),
    #[error("remote error: {0}")]
    Remote(String),
    /// The fan-out gave up on this chain before the call was made.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

impl SimulationError {
    /// Worth retrying after a delay.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SimulationError::Throttled(_)
                | SimulationError::Connection(_)
                | SimulationError::Malformed(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub subject_id: String,
    pub actions: Vec<String>,
    pub resource_ids: Vec<String>,
    pub max_items: usize,
    /// Continuation token from the previous page.
    pub marker: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub action: String,
    pub resource_id: String,
    pub allowed: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationPage {
    pub results: Vec<EvaluationResult>,
    /// Set when more pages follow.
    pub marker: Option<String>,
}

/// Evaluates a subject's effective policy against `(action, resource)` pairs.
pub trait PolicySimulator: Send + Sync {
    fn simulate(&self, request: &SimulationRequest) -> Result<SimulationPage, SimulationError>;
}
