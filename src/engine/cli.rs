//! CLI command handlers: `run` drives the pipeline, `status` reports stage markers.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::arg_parser::{Cli, Commands, CommonArgs, RunArgs};
use crate::inventory::{Inventory, InventoryFactory, JsonlRegistrar};
use crate::monitor::exit_tempfail;
use crate::pipeline::{RunContext, RunStores, run_pipeline};
use crate::store::{SqliteDb, StageStore, Tables};
use crate::utils::settings_toml::validate_opts;
use crate::utils::config::{CREDENTIAL_LIFETIME, PackagePaths};
use crate::utils::{
    CredentialRefresher, EnvCredentials, StaticCredentials, apply_file_to_opts,
    load_settings_toml, setup_logging,
};
use crate::{Opts, Phase};

/// Defaults, then `grantmap.toml`, then CLI flags.
fn setup_opts(common: &CommonArgs, run: Option<&RunArgs>) -> Result<Opts> {
    let mut opts = Opts::default();
    if let Some(file) = load_settings_toml(&common.config_dir)? {
        apply_file_to_opts(&file, &mut opts)?;
    }
    if let Some(ref db) = common.db {
        opts.db_path = Some(db.clone());
    }
    if let Some(v) = common.verbose {
        opts.verbose = v;
    }
    setup_logging(opts.verbose);

    if let Some(run) = run {
        if run.account.is_some() {
            opts.account = run.account.clone();
        }
        if let Some(v) = run.dry_run {
            opts.dry_run = v;
        }
        if let Some(v) = run.disable_access_cache {
            opts.disable_access_cache = v;
        }
        if let Some(v) = run.disable_access_simulation {
            opts.disable_access_simulation = v;
        }
        if let Some(v) = run.disable_resource_filter {
            opts.disable_resource_filter = v;
        }
        if let Some(v) = run.log_access_observations {
            opts.log_access_observations = v;
        }
        if let Some(secs) = run.monitor_interval {
            opts.monitor_interval = Duration::from_secs(secs);
        }
        validate_opts(&opts)?;
    }
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_uppercase(),
        opts
    );
    Ok(opts)
}

/// Environment credentials when present; inventory runs work offline without any.
fn credential_refresher(common: &CommonArgs) -> Arc<dyn CredentialRefresher> {
    let env = EnvCredentials::new(&common.config_dir).with_lifetime(CREDENTIAL_LIFETIME);
    match env.refresh(PackagePaths::get().pkg_name()) {
        Ok(_) => Arc::new(env),
        Err(e) => {
            debug!("{:#}; using anonymous credentials", e);
            Arc::new(StaticCredentials::anonymous())
        }
    }
}

pub fn handle_run(cli: &Cli) -> Result<()> {
    match cli.command {
        Commands::Run(ref args) => handle_pipeline(args),
        Commands::Status(ref args) => handle_status(args),
    }
}

fn handle_pipeline(args: &RunArgs) -> Result<()> {
    let opts = setup_opts(&args.common, Some(args))?;
    if opts.dry_run {
        warn!("RUNNING IN DRY-RUN MODE. NO CHANGES WILL BE WRITTEN TO THE METASTORE, CACHE, OR CATALOG.");
    }
    let inventory = Inventory::load(&args.inventory)?;
    let registrar = Arc::new(JsonlRegistrar::open(&args.catalog_path())?);
    let factory = InventoryFactory::new(inventory, registrar);

    let db = SqliteDb::open(&opts.db_path())?;
    let ctx = RunContext::new(opts, RunStores::sqlite(&db)?);
    let summary = run_pipeline(
        &ctx,
        &factory,
        credential_refresher(&args.common),
        Box::new(exit_tempfail),
    )?;
    for (account, reason) in &summary.skipped {
        warn!("{}: skipped: {}", account, reason);
    }
    Ok(())
}

const UNKNOWN: &str = "UNKNOWN";

/// TSV of each account's last completed scan, access evaluation, and registration (epoch seconds).
pub fn handle_status(args: &CommonArgs) -> Result<()> {
    let opts = setup_opts(args, None)?;
    let db = SqliteDb::open(&opts.db_path())?;
    let stages = StageStore::new(Arc::new(db.table(Tables::STAGES)?));

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out, "ACCOUNT_ID\tLAST_SCANNED\tLAST_EVALUATED\tLAST_PROCESSED")?;
    for account_id in stages.accounts().context("list accounts")? {
        let mut row = vec![account_id.clone()];
        for phase in [Phase::Scan, Phase::AccessEvaluation, Phase::Registration] {
            let cell = stages
                .last_completed(&account_id, phase.as_str())?
                .map(|r| r.ts.to_string())
                .unwrap_or_else(|| UNKNOWN.to_string());
            row.push(cell);
        }
        writeln!(out, "{}", row.join("\t"))?;
    }
    Ok(())
}
