//! imgedit-engine - maintenance runner
//!
//! Opens the engine database under the root folder, rebuilds the recently
//! viewed history and sweeps expired sessions and history entries on a fixed
//! interval until interrupted.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use imgedit_common::config::{load_or_default, resolve_config_path, resolve_root_folder};
use imgedit_engine::EditorEngine;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for imgedit-engine
#[derive(Parser, Debug)]
#[command(name = "imgedit-engine")]
#[command(about = "Image edit session engine maintenance runner")]
#[command(version)]
struct Args {
    /// Root folder holding the database and working copies
    #[arg(short, long, env = "IMGEDIT_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    /// Path to imgedit.toml
    #[arg(short, long, env = "IMGEDIT_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds between sweeps
    #[arg(long, default_value = "3600")]
    sweep_interval_secs: u64,

    /// Run a single sweep and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let toml_config = load_or_default(config_path.as_deref());

    // RUST_LOG wins over the TOML level
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("IMGEDIT_GIT_HASH"),
        built = env!("IMGEDIT_BUILD_TIMESTAMP"),
        profile = env!("IMGEDIT_BUILD_PROFILE"),
        "Starting imgedit-engine"
    );
    if let Some(path) = &config_path {
        info!("Config file: {}", path.display());
    }

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    info!("Root folder: {}", root_folder.display());

    let engine = EditorEngine::open(&root_folder, toml_config.engine.clone())
        .await
        .context("Failed to initialize editor engine")?;

    if args.once {
        run_sweep(&engine).await;
    } else {
        let period = Duration::from_secs(args.sweep_interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        info!(interval_secs = period.as_secs(), "Sweeping periodically");

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = ticker.tick() => run_sweep(&engine).await,
                _ = &mut shutdown => break,
            }
        }
    }

    engine.shutdown().await;
    engine.pool().close().await;
    info!("Shutdown complete");
    Ok(())
}

/// One pass over expired sessions and stale history
async fn run_sweep(engine: &EditorEngine) {
    match engine.sweep_sessions().await {
        Ok(removed) => info!(removed, "Expired sessions removed"),
        Err(e) => error!(error = %e, "Session sweep failed"),
    }
    match engine.sweep_history().await {
        Ok(removed) => info!(removed, "Stale history entries removed"),
        Err(e) => error!(error = %e, "History sweep failed"),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
