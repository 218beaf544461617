//! Entry point for the etcd volume bootstrap.

mod cli;

use clap::Parser;
use cli::{Cli, OutputFormat};
use ebs_bootstrap::{BootstrapError, BootstrapPipeline, Collaborators, Stage};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // Respects RUST_LOG; stdout stays reserved for the report.
    if let Err(e) = tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
    {
        eprintln!("[ERROR] Failed to initialize tracing: {}", e);
    }

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(exit_status(&e))
        }
    }
}

async fn run(args: Cli) -> anyhow::Result<()> {
    let options = args.to_options();
    options.validate()?;

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    let collaborators = Collaborators::aws(&options.region).await;
    let report = BootstrapPipeline::new(options, collaborators)
        .with_cancellation(cancel)
        .run()
        .await
        .inspect_err(|e| tracing::error!(stage = %e.stage(), "Bootstrap failed: {}", e))?;

    match args.output {
        OutputFormat::Text => println!("{}", report),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

/// Cancel the run on SIGINT or SIGTERM.
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::warn!("Received SIGINT, cancelling"),
            _ = terminate => tracing::warn!("Received SIGTERM, cancelling"),
        }
        cancel.cancel();
    });
}

/// 2 for bad configuration, 130 when interrupted, 1 for any other failure.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<BootstrapError>() {
        Some(e) if e.is_cancelled() => 130,
        Some(e) if e.stage() == Stage::Config => 2,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let config: anyhow::Error = BootstrapError::Config("bad".into()).into();
        assert_eq!(exit_status(&config), 2);

        let cancelled: anyhow::Error = BootstrapError::Cancelled {
            stage: Stage::Attach,
        }
        .into();
        assert_eq!(exit_status(&cancelled), 130);

        let not_found: anyhow::Error = BootstrapError::VolumeNotFound {
            name: "data-1".into(),
            zone: "eu-west-1a".into(),
        }
        .into();
        assert_eq!(exit_status(&not_found), 1);
    }
}
