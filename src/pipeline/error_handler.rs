use anyhow::Result;
use log::{error, info};

use crate::{Phase, StageKey};

/// A phase that returned an error or panicked.
#[derive(Clone, Debug)]
pub struct PhaseFailure {
    pub stage: StageKey,
    pub error: String,
}

/// Log each joined phase result with its account; failures are collected, never propagated, so
/// other accounts keep running.
pub fn collect_phase_results(
    account_id: &str,
    results: Vec<(Phase, Result<usize>)>,
    failures: &mut Vec<PhaseFailure>,
) {
    for (phase, result) in results {
        match result {
            Ok(items) => info!("{}: {} processed {} items", account_id, phase, items),
            Err(e) => {
                error!("{}: {} failed: {:#}", account_id, phase, e);
                failures.push(PhaseFailure {
                    stage: StageKey::new(account_id, phase),
                    error: format!("{e:#}"),
                });
            }
        }
    }
}
