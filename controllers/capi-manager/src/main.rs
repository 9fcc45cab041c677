//! Cluster lifecycle controller manager
//!
//! Runs either the reconcilers for Cluster, Machine, MachineSet,
//! MachineDeployment and MachinePool, or (when `--webhook-port` is set)
//! their admission webhooks. One process never does both.

mod config;
mod error;
mod reconciler;
mod scheme;
mod setup;
mod webhooks;

use std::process::ExitCode;

use clap::Parser;
use manager_runtime::{diagnostics, Manager};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Cli, Settings};
use crate::error::BootError;

fn setup_subscriber() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("capi_manager=info,manager_runtime=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received ctrl-c"),
        () = terminate => info!("Received SIGTERM"),
    }
}

async fn run(cli: Cli) -> Result<(), BootError> {
    let settings = Settings::from_cli(cli)?;
    info!(
        mode = settings.mode.name(),
        namespace = settings.namespace.as_deref().unwrap_or("all namespaces"),
        leader_election = settings.leader_election.is_some(),
        sync_period = ?settings.sync_period,
        "Starting cluster manager"
    );

    let registry = scheme::build()?;
    let config = kube::Config::infer().await?;
    let mut manager = Manager::new(registry, config, settings.manager_options())
        .await
        .map_err(BootError::Manager)?;

    setup::setup_checks(&mut manager)?;
    setup::setup_workers(&mut manager, &settings.concurrency)?;

    // detached; only cancelled once the manager has stopped
    let diagnostics_cancel = CancellationToken::new();
    if let Some(addr) = settings.profiler_addr {
        let state = manager.diagnostics();
        let cancel = diagnostics_cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = diagnostics::serve(&addr, state, cancel).await {
                warn!(%addr, error = %e, "Diagnostics endpoint failed");
            }
        });
    }

    info!("Starting manager");
    let result = manager.start(shutdown_signal()).await.map_err(BootError::Run);
    diagnostics_cancel.cancel();
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_subscriber();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    match run(Cli::parse()).await {
        Ok(()) => {
            info!("Manager exited cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(stage = e.stage(), error = %e, "Manager failed");
            ExitCode::FAILURE
        }
    }
}
