//! Error handling and display for the CLI.

use clusternet_reconcile::{DiscoveryError, ReconcileError};
use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid API URL {url:?}: {message}")]
    InvalidApiUrl { url: String, message: String },

    #[error("Failed to create HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);

    let reconcile = err.downcast_ref::<ReconcileError>().or_else(|| {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Reconcile(inner)) => Some(inner),
            _ => None,
        }
    });

    if let Some(reconcile) = reconcile {
        match reconcile {
            ReconcileError::Discovery(DiscoveryError::RootMissing(_)) => {
                eprintln!(
                    "\n{}",
                    "Hint: Run from the repository root or pass --sites-dir.".yellow()
                );
            }
            ReconcileError::NoClusters(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Descriptors must be named ocp4-*.yaml under <site>/mce-tenant-clusters/<env>/<mce>/."
                        .yellow()
                );
            }
            ReconcileError::Discovery(_) => {}
        }
        return;
    }

    if let Some(CliError::InvalidApiUrl { .. }) = err.downcast_ref::<CliError>() {
        eprintln!(
            "\n{}",
            "Hint: Set --api-url or CLUSTERNET_API_URL to e.g. http://ipam.local:8000/api."
                .yellow()
        );
    }
}
