//! Scan phase: run every scanner, mark resources observed, feed the filter queue.

use anyhow::{Result, anyhow};
use log::{error, info, warn};

use super::collaborators::Scanner;
use super::context::RunContext;
use super::queue::CompletionQueue;
use crate::monitor::{Metrics, metric_name};
use crate::store::Metastore;
use crate::types::ResourceError;
use crate::{Phase, Resource};

/// Sets completion on the output queue and completes the stage on every exit path.
struct ScanGuard<'a> {
    ctx: &'a RunContext,
    account_id: &'a str,
    snk: &'a CompletionQueue<Resource>,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.snk.set_completed();
        self.ctx
            .registry
            .complete_stage(&self.ctx.stage(self.account_id, Phase::Scan));
    }
}

/// Run all scanners for `account_id` concurrently. A failing scanner is logged and does not
/// stop its siblings. Returns the number of resources emitted.
pub fn run_scan_phase(
    ctx: &RunContext,
    account_id: &str,
    scanners: &[Box<dyn Scanner>],
    snk: &CompletionQueue<Resource>,
) -> Result<usize> {
    let _guard = ScanGuard {
        ctx,
        account_id,
        snk,
    };
    let stage = ctx.stage(account_id, Phase::Scan);
    ctx.registry.set_progress_metrics(
        &stage,
        scanners
            .iter()
            .map(|s| metric_name(account_id, &Metrics::observed(&s.spec().name)))
            .collect(),
    );
    ctx.registry.start_stage(&stage);

    let results: Vec<(String, Result<usize>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = scanners
            .iter()
            .map(|scanner| {
                let name = scanner.spec().name.clone();
                let handle = scope.spawn(move || run_scanner(ctx, account_id, scanner.as_ref(), snk));
                (name, handle)
            })
            .collect();
        handles
            .into_iter()
            .map(|(name, h)| {
                let result = h
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("scanner thread panicked")));
                (name, result)
            })
            .collect()
    });

    let mut total = 0;
    for (name, result) in results {
        match result {
            Ok(n) => {
                info!("{}: {} scanner observed {} resources", account_id, name, n);
                total += n;
            }
            Err(e) => error!("{}: {} scanner failed: {:#}", account_id, name, e),
        }
    }
    Ok(total)
}

fn run_scanner(
    ctx: &RunContext,
    account_id: &str,
    scanner: &dyn Scanner,
    snk: &CompletionQueue<Resource>,
) -> Result<usize> {
    let name = &scanner.spec().name;
    let observed = ctx.counter(account_id, &Metrics::observed(name));
    let errors = ctx.counter(account_id, &Metrics::observe_errors(name));
    let mut emitted = 0;
    scanner.scan(&mut |item: Result<Resource, ResourceError>| match item {
        Ok(resource) => {
            if let Err(e) = ctx.metastore.set_observed(&Metastore::key(resource.arn())) {
                errors.incr();
                warn!(
                    "{}: failed to mark {} observed: {:#}",
                    account_id,
                    resource.id(),
                    e
                );
            }
            observed.incr();
            emitted += 1;
            snk.put(resource);
        }
        Err(e) => {
            errors.incr();
            warn!("{}: {} scanner skipped a resource: {}", account_id, name, e);
        }
    })?;
    Ok(emitted)
}
