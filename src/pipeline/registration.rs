//! Registration phase: publish each evaluated resource and record when it was registered.

use anyhow::Result;
use log::{debug, error, info};

use super::collaborators::{DatasetRegistration, Registrar};
use super::context::{EvaluatedResource, RunContext};
use super::queue::CompletionQueue;
use super::stages::{StageRun, process_completion_queue};
use crate::access::{MinIntervalLimiter, jitter_ttl};
use crate::monitor::Metrics;
use crate::store::Metastore;
use crate::types::epoch_secs;
use crate::utils::config::RegistrationConsts;
use crate::{AccessGrant, Phase, Resource};

/// Epoch seconds of the next refresh for a registration started at `start`: 12 to 24 hours later.
pub fn next_refresh_at(start: i64) -> i64 {
    let max = RegistrationConsts::EXCLUSION_MAX_SECS;
    let ratio = RegistrationConsts::EXCLUSION_MIN_SECS as f64 / max as f64;
    start + jitter_ttl(max, ratio)
}

pub struct RegistrationPhase<'a> {
    ctx: &'a RunContext,
    account_id: &'a str,
    registrar: &'a dyn Registrar,
    limiter: MinIntervalLimiter,
}

impl<'a> RegistrationPhase<'a> {
    pub fn new(ctx: &'a RunContext, account_id: &'a str, registrar: &'a dyn Registrar) -> Self {
        Self {
            ctx,
            account_id,
            registrar,
            limiter: MinIntervalLimiter::new(ctx.opts.catalog_rate_limit),
        }
    }

    /// Register one dataset. Errors are counted and logged by the caller.
    pub fn register(&self, resource: &Resource, grants: &[AccessGrant]) -> Result<()> {
        let key = Metastore::key(resource.arn());
        let metastore = &self.ctx.metastore;
        let metadata = metastore.get_regional_or_global(resource.arn())?;
        if let Some(created) = resource.creation_time() {
            metastore.set_created_at(&key, created)?;
        }
        let dataset = DatasetRegistration {
            resource,
            grants,
            name: resource.arn().catalog_name(),
            metadata,
        };
        if self.ctx.opts.dry_run {
            info!(
                "{}: dry run, would register {} with {} grants",
                self.account_id, dataset.name, grants.len()
            );
            return Ok(());
        }

        self.limiter.wait();
        let start = epoch_secs();
        self.registrar.register(&dataset)?;
        self.ctx
            .counter(self.account_id, Metrics::DATASETS_REGISTERED)
            .incr();
        if !grants.is_empty() {
            self.ctx
                .counter(self.account_id, Metrics::ACCESS_REGISTERED)
                .incr();
        }
        metastore.set_refresh_at(&key, next_refresh_at(start))?;
        metastore.set_registered(&key)?;
        debug!("{}: registered {}", self.account_id, dataset.name);
        Ok(())
    }
}

pub fn run_registration_phase(
    ctx: &RunContext,
    account_id: &str,
    registrar: &dyn Registrar,
    src: &CompletionQueue<EvaluatedResource>,
) -> Result<usize> {
    let run = StageRun {
        stage: ctx.stage(account_id, Phase::Registration),
        registry: &ctx.registry,
        poll: ctx.opts.queue_poll,
    };
    let phase = RegistrationPhase::new(ctx, account_id, registrar);
    let errors = ctx.counter(account_id, Metrics::REGISTRATION_ERRORS);
    process_completion_queue(
        src,
        &run,
        |(resource, grants)| {
            if let Err(e) = phase.register(&resource, &grants) {
                errors.incr();
                error!(
                    "{}: registration failed for {}: {:#}",
                    account_id,
                    resource.id(),
                    e
                );
            }
            Ok(())
        },
        || {},
    )
}
