//! Access evaluation phase: batches of filtered resources through the [`BatchCaller`].

use anyhow::Result;
use log::{error, info};

use super::context::{EvaluatedResource, RunContext};
use super::queue::CompletionQueue;
use super::stages::{StageRun, batch_process_completion_queue};
use crate::access::{AccessError, BatchCaller};
use crate::{Phase, Resource, Subject};

/// Evaluate every filtered resource for `subjects` and forward it with its grants. A batch that
/// times out is dropped (its resources are retried on the next run); other batches continue.
pub fn run_access_phase(
    ctx: &RunContext,
    account_id: &str,
    subjects: &[Subject],
    caller: &BatchCaller,
    src: &CompletionQueue<Resource>,
    snk: &CompletionQueue<EvaluatedResource>,
) -> Result<usize> {
    let run = StageRun {
        stage: ctx.stage(account_id, Phase::AccessEvaluation),
        registry: &ctx.registry,
        poll: ctx.opts.queue_poll,
    };
    info!(
        "{}: evaluating access for {} subjects",
        account_id,
        subjects.len()
    );
    batch_process_completion_queue(
        src,
        ctx.opts.batch_size,
        &run,
        |batch| {
            match caller.evaluate(subjects, &batch) {
                Ok(mut outcome) => {
                    for resource in batch {
                        let grants = outcome.grants.remove(resource.id()).unwrap_or_default();
                        snk.put((resource, grants));
                    }
                }
                Err(e @ AccessError::Timeout { .. }) => {
                    error!(
                        "{}: dropping batch of {} resources: {}",
                        account_id,
                        batch.len(),
                        e
                    );
                }
                Err(e) => return Err(e.into()),
            }
            Ok(())
        },
        || snk.set_completed(),
    )
}
