use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::PackagePaths;

/// Discover resources across accounts, evaluate who can access them, and publish them to a catalog.
#[derive(Clone, Parser)]
#[command(name = "grantmap")]
#[command(about = "Resource discovery and access registration pipeline with a liveness watchdog.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Run the pipeline for every account (or one with --account).
    Run(RunArgs),
    /// Print per-account stage completion times as TSV.
    Status(CommonArgs),
}

#[derive(Clone, Args)]
pub struct CommonArgs {
    /// State database (metastore, access cache, stage markers). Default: `.grantmap.db`.
    #[arg(long, short)]
    pub db: Option<PathBuf>,

    /// Directory holding `grantmap.toml` and `.env`. Default: current directory.
    #[arg(long, default_value = ".")]
    pub config_dir: PathBuf,

    /// Verbose output.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

#[derive(Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// JSON inventory of accounts, resources, subjects and allowed actions.
    #[arg(long, short = 'i', value_name = "FILE")]
    pub inventory: PathBuf,

    /// JSON-lines catalog output. Default: `grantmap.catalog.jsonl`.
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Process a single account.
    #[arg(long, short = 'a')]
    pub account: Option<String>,

    /// Run everything but write nothing to the metastore, access cache, or catalog.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub dry_run: Option<bool>,

    /// Ignore cached grants and do not cache new ones.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub disable_access_cache: Option<bool>,

    /// Skip policy evaluation; every resource is registered without grants.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub disable_access_simulation: Option<bool>,

    /// Register every scanned resource, even if registered recently.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub disable_resource_filter: Option<bool>,

    /// Log every observed (principal, resource, capabilities) triple.
    #[arg(long, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub log_access_observations: Option<bool>,

    /// Watchdog sampling interval in seconds.
    #[arg(long, value_parser = clap::value_parser!(u64))]
    pub monitor_interval: Option<u64>,
}

impl RunArgs {
    /// Catalog path, defaulting to the package catalog filename in the working directory.
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().catalog_filename()))
    }
}
