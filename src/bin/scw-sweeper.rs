//! Sweeper for residual Scaleway test resources.
//!
//! Deletes every resource whose name starts with `--prefix` across all
//! regions and zones, children before parents, and exits non-zero when any
//! item could not be removed.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use scw_provider::driver::OperationContext;
use scw_provider::{
    ConfigError, Provider, ProviderSettings, ResolvedConfig, SweepConfig, SweepError,
    SweepSummary,
};

#[path = "../cli/mod.rs"]
mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("sweep failed: {0}")]
    Sweep(#[from] SweepError),
    #[error("failed to write summary: {0}")]
    Output(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match sweep(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };
    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn sweep(cli: Cli) -> Result<(), CliError> {
    let config = SweepConfig::new(cli.prefix)?;
    let resolved = ResolvedConfig::load(&ProviderSettings::default())?;
    let provider = Provider::new(&resolved);
    let registry = provider.sweepers()?;

    let summary = registry
        .run(&config, &cli.kinds, &OperationContext::new())
        .await?;
    write_summary(&mut io::stdout().lock(), &summary)?;
    summary.into_result()?;
    Ok(())
}

fn write_summary(out: &mut impl Write, summary: &SweepSummary) -> io::Result<()> {
    for item in &summary.deleted {
        writeln!(out, "deleted {} {} ({})", item.kind, item.id, item.name)?;
    }
    for warning in &summary.warnings {
        writeln!(out, "warning: {warning}")?;
    }
    for failure in &summary.failures {
        writeln!(out, "failed {} {}: {}", failure.kind, failure.target, failure.message)?;
    }
    writeln!(
        out,
        "sweep complete: deleted={}, skipped={}, failed={}",
        summary.deleted.len(),
        summary.skipped,
        summary.failures.len()
    )
}

fn report_error(err: &CliError) {
    writeln!(io::stderr(), "scw-sweeper: {err}").ok();
}
