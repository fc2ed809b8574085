//! grantmap CLI: run the discovery pipeline or report per-account stage status.

use anyhow::Result;
use clap::Parser;
use grantmap::engine::Cli;
use grantmap::engine::handle_run;
use std::time::Instant;

fn main() -> Result<()> {
    let start_time = Instant::now();
    let cli = Cli::parse();
    handle_run(&cli)?;
    log::debug!("Total time: {:?}", start_time.elapsed());
    Ok(())
}
