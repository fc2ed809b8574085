//! Filter phase: drop resources registered recently enough that re-registering is wasted work.

use anyhow::Result;
use log::{debug, warn};

use super::context::RunContext;
use super::queue::CompletionQueue;
use super::stages::{StageRun, process_completion_queue};
use crate::monitor::Metrics;
use crate::store::{Metastore, Record};
use crate::types::epoch_secs;
use crate::utils::config::RegistrationConsts;
use crate::{Phase, Resource};

/// Exclude when registered and either registered under the minimum interval ago or the
/// scheduled refresh is still in the future.
pub fn should_exclude(record: &Record, now: i64) -> bool {
    let Some(registered) = Metastore::registered(record) else {
        return false;
    };
    now - registered < RegistrationConsts::EXCLUSION_MIN_SECS
        || Metastore::refresh_at(record).is_some_and(|r| r > now)
}

pub fn run_filter_phase(
    ctx: &RunContext,
    account_id: &str,
    src: &CompletionQueue<Resource>,
    snk: &CompletionQueue<Resource>,
) -> Result<usize> {
    let run = StageRun {
        stage: ctx.stage(account_id, Phase::Filter),
        registry: &ctx.registry,
        poll: ctx.opts.queue_poll,
    };
    let emitted = ctx.counter(account_id, Metrics::FILTER_EMITTED);
    let excluded = ctx.counter(account_id, Metrics::FILTER_EXCLUDED);
    let errors = ctx.counter(account_id, Metrics::FILTER_ERRORS);
    let disabled = ctx.opts.disable_resource_filter;

    process_completion_queue(
        src,
        &run,
        |resource| {
            if !disabled {
                match ctx.metastore.get_regional_or_global(resource.arn()) {
                    Ok(Some(record)) if should_exclude(&record, epoch_secs()) => {
                        debug!(
                            "{}: excluding recently registered {}",
                            account_id,
                            resource.id()
                        );
                        excluded.incr();
                        return Ok(());
                    }
                    Ok(_) => {}
                    Err(e) => {
                        errors.incr();
                        warn!(
                            "{}: metastore read failed for {}, not filtering: {:#}",
                            account_id,
                            resource.id(),
                            e
                        );
                    }
                }
            }
            emitted.incr();
            snk.put(resource);
            Ok(())
        },
        || snk.set_completed(),
    )
}
