mod executor;
mod fleet;
mod init;

use std::path::Path;

use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

pub use self::executor::{ExecutorArgs, run_executor};
pub use self::fleet::{FleetArgs, run_fleet};
pub use self::init::{InitArgs, run_init};

use crate::config::{self, EngineConfig};
use crate::error::EngineResult;

/// Load the config file if one was given, otherwise run on defaults.
async fn load_config(path: Option<&Path>) -> EngineResult<EngineConfig> {
    match path {
        Some(path) => config::load(path).await,
        None => {
            info!("no config file given, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

/// Serve `router` on `listen` until SIGTERM or SIGINT, then let in-flight
/// requests finish.
async fn serve(listen: &str, router: Router, name: &str) -> EngineResult<()> {
    let listener = TcpListener::bind(listen).await?;
    info!(addr = %listener.local_addr()?, server = name, "listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!(server = name, "stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).ok();
    let mut sigint = signal(SignalKind::interrupt()).ok();

    tokio::select! {
        _ = recv_signal(&mut sigterm) => info!("received SIGTERM, shutting down"),
        _ = recv_signal(&mut sigint) => info!("received SIGINT, shutting down"),
    }
}

async fn recv_signal(sig: &mut Option<tokio::signal::unix::Signal>) {
    match sig {
        Some(s) => {
            s.recv().await;
        }
        None => std::future::pending().await,
    }
}
