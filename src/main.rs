use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::{error::Error, watcher::WatchSummary};

mod annotator;
mod bootstrap;
mod error;
mod watcher;

/// Annotates every pod created in the default namespace with annotatedBy=podAnnotator.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the kubeconfig file, used when no in-cluster identity is available.
    /// Defaults to $HOME/.kube/config. Takes two dashes: --kubeconfig, not -kubeconfig.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

async fn annotate_pods(args: Args) -> Result<WatchSummary, Error> {
    let kubeconfig = args.kubeconfig.or_else(bootstrap::default_kubeconfig_path);
    let client = bootstrap::connect(kubeconfig).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("unable to listen for shutdown signal: {e}");
                return;
            }
            shutdown.cancel();
        }
    });

    watcher::run(&client, &client, shutdown).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match annotate_pods(args).await {
        Ok(summary) => {
            info!(
                "pod watcher stopped: {} pods observed, {} annotated, {} failed",
                summary.observed, summary.annotated, summary.failed
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
