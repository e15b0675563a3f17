mod cli;

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::Parser;
use fedrun_api::{HttpApi, SupervisorApiAdapter};
use fedrun_core::Supervisor;
use fedrun_observe::logger_init;
use fedrun_store::StoreClient;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{Cli, Role};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let common = match &cli.role {
        Role::Coordinator(args) => &args.common,
        Role::Participant(args) => &args.common,
    };

    logger_init(&common.logger()).context("logger setup")?;

    let store = StoreClient::from_rest(common.rest()).context("record store setup")?;
    if !store.is_enabled() {
        info!("record store not configured; sessions and runs are not recorded");
    }

    let (supervisor, listen): (Supervisor, SocketAddr) = match &cli.role {
        Role::Coordinator(args) => (Supervisor::coordinator(args.settings(), store), args.listen),
        Role::Participant(args) => {
            let host = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|e| {
                    warn!(error = %e, "hostname unavailable");
                    "unknown".to_string()
                });
            (Supervisor::participant(args.settings(&host), store), args.listen)
        }
    };
    let supervisor = Arc::new(supervisor);

    let router = HttpApi::new(Arc::new(SupervisorApiAdapter::new(supervisor.clone()))).router();
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    info!(%listen, role = %supervisor.role(), "control API listening");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    fedrun_api::axum::serve(listener, router)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("http server")?;

    info!("stopping supervised processes");
    supervisor.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

/// Cancel `token` on Ctrl-C, or on SIGTERM where available.
async fn watch_signals(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("interrupt received"),
        _ = terminate => info!("terminate received"),
    }
    token.cancel();
}
