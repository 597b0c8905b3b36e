//! clusternet - VLAN allocation and network rule injection for MCE-managed
//! OpenShift cluster descriptors.
//!
//! The binary is a thin wrapper around [`run`]: resolve settings, build the
//! HTTP allocator, reconcile the descriptor tree and hand back the summary.

use std::process::ExitCode;

use anyhow::Result;
use clusternet_reconcile::{Reconciler, RunSummary};
use tokio::sync::watch;
use tracing::info;

pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;

use cli::{Cli, Settings};
use client::HttpAllocator;
use config::Config;
use error::CliError;

/// Exit code after Ctrl-C.
pub const EXIT_INTERRUPTED: u8 = 130;

/// Reconcile the descriptor tree described by the command line.
pub async fn run(cli: &Cli, shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
    let config = Config::load(cli.config.as_deref())?;
    let settings = Settings::resolve(cli, config);

    info!(
        api_url = %settings.client.api_url,
        sites_dir = %settings.reconciler.sites_dir.display(),
        vrf = %settings.reconciler.vrf,
        dry_run = settings.reconciler.dry_run,
        update_existing = settings.reconciler.update_existing,
        "Configuration loaded"
    );

    let allocator = HttpAllocator::new(&settings.client)?;
    let mut reconciler = Reconciler::new(allocator, settings.reconciler);
    let summary = reconciler.run(shutdown).await.map_err(CliError::from)?;

    Ok(summary)
}

/// Numeric exit status for a finished run: 0 clean, 1 on any failure,
/// [`EXIT_INTERRUPTED`] when a signal cut the run short.
pub fn exit_status(summary: &RunSummary) -> u8 {
    if summary.interrupted {
        EXIT_INTERRUPTED
    } else if summary.has_failures() {
        1
    } else {
        0
    }
}

/// Process exit code for a finished run.
pub fn exit_code(summary: &RunSummary) -> ExitCode {
    ExitCode::from(exit_status(summary))
}
