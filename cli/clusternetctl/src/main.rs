//! clusternet - allocate VLANs and wire MCE network rules into cluster
//! descriptors.

use std::process::ExitCode;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use clusternetctl::cli::Cli;
use clusternetctl::{error, exit_code, logging, output};

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_level, cli.log_json);

    // Clusters are processed strictly one at a time.
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error::print_error(&anyhow::Error::new(e).context("Failed to start runtime"));
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> ExitCode {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, finishing current cluster");
            let _ = shutdown_tx.send(true);
        }
    });

    match clusternetctl::run(&cli, shutdown_rx).await {
        Ok(summary) => {
            output::print_summary(&summary, cli.format);
            info!(
                interrupted = summary.interrupted,
                failed = summary.counts().failed,
                "Run complete"
            );
            exit_code(&summary)
        }
        Err(e) => {
            error::print_error(&e);
            ExitCode::FAILURE
        }
    }
}
