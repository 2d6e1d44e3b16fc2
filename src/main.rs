use clap::Parser;
use remdit_server::config::Config;
use remdit_server::routes::{create_router, AppState};
use remdit_server::services::{FileRegistry, SshConnRegistry};
use remdit_server::ssh;
use remdit_server::ws::HubManager;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Remote-edit relay: stage a file over SSH/SFTP, edit it in the browser,
/// sync saves back to the client.
#[derive(Parser)]
#[command(name = "remdit-server", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "remdit_server=debug,tower_http=info,info".into()
        }))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    // Construct the shared services
    let files = Arc::new(FileRegistry::new());
    let ssh_conns = Arc::new(SshConnRegistry::new());
    let hubs = Arc::new(HubManager::new(
        files.clone(),
        ssh_conns.clone(),
        Duration::from_secs(config.session_timeout_hours * 3600),
    ));
    hubs.spawn_reaper();

    let state = AppState {
        config: config.clone(),
        files: files.clone(),
        ssh_conns: ssh_conns.clone(),
        hubs: hubs.clone(),
    };
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(config.api_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %config.api_address(), err = %e, "failed to bind API server");
            std::process::exit(1);
        }
    };
    info!(addr = %config.api_address(), "API server listening");

    let ssh_config = config.clone();
    tokio::select! {
        result = ssh::serve(ssh_config, files, ssh_conns, hubs) => {
            if let Err(e) = result {
                error!(err = %e, "SSH server exited");
                std::process::exit(1);
            }
        }
        result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()) => {
            match result {
                Ok(()) => info!("API server shut down"),
                Err(e) => warn!(err = %e, "API server exited with error"),
            }
        }
    }
    info!("server stopped");
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        error!("failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received, draining");
}
