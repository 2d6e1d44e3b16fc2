pub mod handler;
pub mod sftp;

pub use handler::{ConnHandler, SessionState, SshError};

use crate::config::Config;
use crate::services::{FileRegistry, SshConnRegistry};
use crate::ws::HubManager;
use russh::server::Server;
use russh::{MethodKind, MethodSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("failed to load SSH private key from {0}: {1}")]
    HostKey(String, #[source] russh::keys::Error),
    #[error("SSH listener error: {0}")]
    Listener(#[from] std::io::Error),
}

/// Accept loop factory: one [`ConnHandler`] per inbound TCP connection.
pub struct SshServer {
    config: Arc<Config>,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    hubs: Arc<HubManager>,
}

impl Server for SshServer {
    type Handler = ConnHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> ConnHandler {
        ConnHandler::new(
            peer_addr,
            self.config.clone(),
            self.files.clone(),
            self.ssh_conns.clone(),
            self.hubs.clone(),
        )
    }

    fn handle_session_error(&mut self, error: SshError) {
        error!(err = %error, "SSH session failed");
    }
}

/// Run the SSH listener until the process shuts down.
pub async fn serve(
    config: Arc<Config>,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    hubs: Arc<HubManager>,
) -> Result<(), ServeError> {
    let key = russh::keys::load_secret_key(&config.ssh_private_key_path, None)
        .map_err(|e| ServeError::HostKey(config.ssh_private_key_path.clone(), e))?;

    let methods: MethodSet = if config.ssh_password_auth {
        [MethodKind::Password].as_slice().into()
    } else {
        [MethodKind::PublicKey].as_slice().into()
    };

    let server_config = russh::server::Config {
        methods,
        keys: vec![key],
        auth_rejection_time: Duration::from_secs(1),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: None,
        ..Default::default()
    };

    let addr = config.ssh_address();
    info!(addr = %addr, "SSH server listening");

    let mut server = SshServer {
        config,
        files,
        ssh_conns,
        hubs,
    };
    server
        .run_on_address(Arc::new(server_config), addr)
        .await?;
    Ok(())
}
