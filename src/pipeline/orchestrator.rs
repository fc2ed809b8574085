use anyhow::{Context, Result, anyhow, bail};
use crossbeam_channel::bounded;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use super::collaborators::{AccountCollaborators, CollaboratorFactory};
use super::context::{AccountQueues, RunContext};
use super::error_handler::{PhaseFailure, collect_phase_results};
use super::evaluation::run_access_phase;
use super::filter::run_filter_phase;
use super::registration::run_registration_phase;
use super::scan::run_scan_phase;
use crate::access::{BatchCaller, BatchTuning};
use crate::monitor::{Metrics, TerminationHook, Watchdog, WatchdogConfig, metric_name};
use crate::utils::{CredentialRefresher, Session};
use crate::{Phase, Subject};

/// What a run did, per account.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub processed: Vec<String>,
    /// Accounts that could not be set up, with the reason.
    pub skipped: Vec<(String, String)>,
    pub failures: Vec<PhaseFailure>,
}

/// An account ready to spawn: collaborators validated, subjects fetched, caller built.
struct PreparedAccount {
    account_id: String,
    collaborators: AccountCollaborators,
    subjects: Vec<Subject>,
    caller: BatchCaller,
}

/// Joined by the driver once every phase thread has been spawned.
pub struct AccountHandles {
    pub account_id: String,
    pub handles: Vec<(Phase, JoinHandle<Result<usize>>)>,
}

fn spawn_phase<F>(account_id: &str, phase: Phase, f: F) -> Result<JoinHandle<Result<usize>>>
where
    F: FnOnce() -> Result<usize> + Send + 'static,
{
    std::thread::Builder::new()
        .name(format!("{account_id}-{phase}"))
        .spawn(f)
        .with_context(|| format!("{account_id}: spawn {phase} thread"))
}

/// Start the four phase threads for one account, linked by completion queues.
fn spawn_account_pipeline(ctx: &Arc<RunContext>, account: PreparedAccount) -> Result<AccountHandles> {
    let PreparedAccount {
        account_id,
        collaborators,
        subjects,
        caller,
    } = account;
    let AccountCollaborators {
        scanners,
        registrar,
        ..
    } = collaborators;
    let queues = AccountQueues::new();

    // Cached batches make no API calls; processed resources also count as progress.
    ctx.registry.set_progress_metrics(
        &ctx.stage(&account_id, Phase::AccessEvaluation),
        vec![
            metric_name(&account_id, Metrics::API_CALLS),
            metric_name(&account_id, Metrics::RESOURCES_PROCESSED),
        ],
    );

    let mut handles = Vec::with_capacity(Phase::ALL.len());

    let (c, a, snk) = (Arc::clone(ctx), account_id.clone(), Arc::clone(&queues.scanned));
    handles.push((
        Phase::Scan,
        spawn_phase(&account_id, Phase::Scan, move || {
            run_scan_phase(&c, &a, &scanners, &snk)
        })?,
    ));

    let (c, a) = (Arc::clone(ctx), account_id.clone());
    let (src, snk) = (Arc::clone(&queues.scanned), Arc::clone(&queues.filtered));
    handles.push((
        Phase::Filter,
        spawn_phase(&account_id, Phase::Filter, move || {
            run_filter_phase(&c, &a, &src, &snk)
        })?,
    ));

    let (c, a) = (Arc::clone(ctx), account_id.clone());
    let (src, snk) = (Arc::clone(&queues.filtered), Arc::clone(&queues.evaluated));
    handles.push((
        Phase::AccessEvaluation,
        spawn_phase(&account_id, Phase::AccessEvaluation, move || {
            run_access_phase(&c, &a, &subjects, &caller, &src, &snk)
        })?,
    ));

    let (c, a, src) = (Arc::clone(ctx), account_id.clone(), Arc::clone(&queues.evaluated));
    handles.push((
        Phase::Registration,
        spawn_phase(&account_id, Phase::Registration, move || {
            run_registration_phase(&c, &a, registrar.as_ref(), &src)
        })?,
    ));

    Ok(AccountHandles {
        account_id,
        handles,
    })
}

/// Join every phase thread of one account (after its queues drain).
pub fn join_account(handles: AccountHandles, failures: &mut Vec<PhaseFailure>) {
    let results = handles
        .handles
        .into_iter()
        .map(|(phase, h)| {
            let result = h
                .join()
                .map_err(|_| anyhow!("{} thread panicked", phase))
                .and_then(|r| r);
            (phase, result)
        })
        .collect();
    collect_phase_results(&handles.account_id, results, failures);
}

/// Accounts to process: every account from the factory, or only `opts.account`.
fn select_accounts(ctx: &RunContext, factory: &dyn CollaboratorFactory) -> Result<Vec<String>> {
    let accounts = factory.accounts().context("list accounts")?;
    let Some(ref only) = ctx.opts.account else {
        return Ok(accounts);
    };
    if !accounts.contains(only) {
        bail!("account {} not found", only);
    }
    info!("processing single account: {}", only);
    Ok(vec![only.clone()])
}

/// Main orchestrator: set up every account, run their pipelines concurrently under the
/// watchdog, and join everything. Scanner misconfiguration fails the run before any thread
/// starts; account setup failures skip that account.
pub fn run_pipeline(
    ctx: &Arc<RunContext>,
    factory: &dyn CollaboratorFactory,
    refresher: Arc<dyn CredentialRefresher>,
    on_fatal: TerminationHook,
) -> Result<RunSummary> {
    let start = Instant::now();
    let mut summary = RunSummary::default();
    let mut prepared = Vec::new();

    for account_id in select_accounts(ctx, factory)? {
        let session = Session::new(&account_id, Arc::clone(&refresher));
        let collaborators = match factory.for_account(&account_id, &session) {
            Ok(c) => c,
            Err(e) => {
                error!("{}: unable to set up account: {:#}", account_id, e);
                summary.skipped.push((account_id, format!("{e:#}")));
                continue;
            }
        };
        collaborators
            .validate()
            .with_context(|| format!("{account_id}: invalid scanner configuration"))?;
        let subjects = match collaborators.subjects.subjects() {
            Ok(s) => s,
            Err(e) => {
                error!("{}: unable to list subjects: {:#}", account_id, e);
                summary.skipped.push((account_id, format!("{e:#}")));
                continue;
            }
        };
        info!("{}: {} access subjects", account_id, subjects.len());
        let caller = BatchCaller::new(
            &account_id,
            Arc::clone(&collaborators.simulator),
            ctx.access_cache(&account_id),
            Arc::clone(&ctx.counters),
            BatchTuning::from_opts(&ctx.opts),
        )?
        .with_opts(&ctx.opts);
        prepared.push(PreparedAccount {
            account_id,
            collaborators,
            subjects,
            caller,
        });
    }

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    let watchdog = Watchdog::new(
        Arc::clone(&ctx.registry),
        Arc::clone(&ctx.counters),
        WatchdogConfig::from_opts(&ctx.opts),
        on_fatal,
    )
    .spawn(shutdown_rx)
    .context("spawn watchdog thread")?;

    let mut running = Vec::with_capacity(prepared.len());
    for account in prepared {
        let account_id = account.account_id.clone();
        match spawn_account_pipeline(ctx, account) {
            Ok(handles) => running.push(handles),
            Err(e) => {
                error!("{:#}", e);
                summary.skipped.push((account_id, format!("{e:#}")));
            }
        }
    }

    for handles in running {
        let account_id = handles.account_id.clone();
        join_account(handles, &mut summary.failures);
        summary.processed.push(account_id);
    }

    let _ = shutdown_tx.send(());
    if watchdog.join().is_err() {
        warn!("watchdog thread panicked");
    }

    for (stage, duration, _) in ctx.registry.snapshot() {
        debug!("{}: {:.1}s", stage, duration.as_secs_f64());
    }
    info!(
        "processing complete: {} accounts, {} skipped, {} phase failures in {:.1}s",
        summary.processed.len(),
        summary.skipped.len(),
        summary.failures.len(),
        start.elapsed().as_secs_f64()
    );
    Ok(summary)
}
