use crate::config::{Config, SFTP_PACKET_LIMIT};
use crate::services::{FileRegistry, SshConnRegistry, StagedFile};
use crate::ssh::sftp::SftpSession;
use crate::ws::HubManager;
use russh::keys::Algorithm;
use russh::server::{Auth, Handler, Msg, Session};
use russh::{Channel, ChannelId};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Phases of the control protocol a client session walks through.
///
/// Transitions are strictly forward; a request that does not match the
/// current phase is refused and the phase is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    None,
    FileUpload,
    FileInfo,
    Listen,
}

impl SessionState {
    /// Advance from `expected` to `to`; refuse anything else.
    pub fn try_advance(&mut self, expected: SessionState, to: SessionState) -> bool {
        if *self == expected {
            *self = to;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SshError {
    #[error("ssh transport error: {0}")]
    Transport(#[from] russh::Error),
}

/// Per-connection SSH state.
///
/// Allocates the file id and staged-file handle up front, walks the client
/// through auth, a single `session` channel, and the `sftp` subsystem, and
/// guarantees resource reclamation when the connection goes away.
pub struct ConnHandler {
    peer_addr: Option<SocketAddr>,
    user: Option<String>,
    config: Arc<Config>,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    hubs: Arc<HubManager>,
    file_id: String,
    staged: Arc<StagedFile>,
    state: Arc<Mutex<SessionState>>,
    channel: Option<Channel<Msg>>,
}

impl ConnHandler {
    pub fn new(
        peer_addr: Option<SocketAddr>,
        config: Arc<Config>,
        files: Arc<FileRegistry>,
        ssh_conns: Arc<SshConnRegistry>,
        hubs: Arc<HubManager>,
    ) -> Self {
        let file_id = Uuid::new_v4().to_string();
        let staged = Arc::new(StagedFile::new(Path::new(&config.uploads_dir), &file_id));
        Self {
            peer_addr,
            user: None,
            config,
            files,
            ssh_conns,
            hubs,
            file_id,
            staged,
            state: Arc::new(Mutex::new(SessionState::None)),
            channel: None,
        }
    }

    fn remote_addr(&self) -> String {
        self.peer_addr
            .map(|a| a.to_string())
            .unwrap_or_else(|| "<unknown>".to_string())
    }
}

impl Handler for ConnHandler {
    type Error = SshError;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        self.user = Some(user.to_string());
        if !self.config.ssh_password_auth {
            return Ok(Auth::reject());
        }
        info!(user, remote_addr = %self.remote_addr(), "SSH password authentication attempt");
        for allowed in &self.config.ssh_allowed_passwords {
            if allowed.is_empty() {
                continue;
            }
            if constant_time_eq(password.as_bytes(), allowed.as_bytes()) {
                info!(user, remote_addr = %self.remote_addr(), "SSH authentication successful");
                return Ok(Auth::Accept);
            }
        }
        warn!(user, remote_addr = %self.remote_addr(), "SSH authentication failed: invalid password");
        Ok(Auth::reject())
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &russh::keys::PublicKey,
    ) -> Result<Auth, Self::Error> {
        self.user = Some(user.to_string());
        if self.config.ssh_password_auth {
            return Ok(Auth::reject());
        }
        // any key is accepted, the algorithm list is the only gate
        if public_key.algorithm() == Algorithm::Ed25519 {
            Ok(Auth::Accept)
        } else {
            warn!(
                user,
                remote_addr = %self.remote_addr(),
                algorithm = ?public_key.algorithm(),
                "SSH authentication failed: unsupported key algorithm"
            );
            Ok(Auth::reject())
        }
    }

    async fn auth_succeeded(&mut self, _session: &mut Session) -> Result<(), Self::Error> {
        info!(
            remote_addr = %self.remote_addr(),
            user = self.user.as_deref().unwrap_or("<unknown>"),
            fileid = %self.file_id,
            "SSH connection established"
        );
        Ok(())
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let state = *self.state.lock().await;
        if state != SessionState::None || self.channel.is_some() {
            warn!(
                remote_addr = %self.remote_addr(),
                state = ?state,
                "rejecting session channel: session already in progress"
            );
            return Ok(false);
        }
        self.channel = Some(channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != "sftp" {
            warn!(subsystem = name, "rejecting unsupported subsystem");
            session.channel_failure(channel_id)?;
            return Ok(());
        }
        if *self.state.lock().await != SessionState::None {
            session.channel_failure(channel_id)?;
            return Ok(());
        }
        let channel = match self.channel.take() {
            Some(channel) if channel.id() == channel_id => channel,
            Some(other) => {
                self.channel = Some(other);
                session.channel_failure(channel_id)?;
                return Ok(());
            }
            None => {
                session.channel_failure(channel_id)?;
                return Ok(());
            }
        };

        session.channel_success(channel_id)?;
        info!(
            remote_addr = %self.remote_addr(),
            user = self.user.as_deref().unwrap_or("<unknown>"),
            fileid = %self.file_id,
            "starting SFTP subsystem"
        );

        let sftp = SftpSession::new(
            self.file_id.clone(),
            self.staged.clone(),
            self.state.clone(),
            session.handle(),
            self.files.clone(),
            self.ssh_conns.clone(),
            self.config.clone(),
        );
        russh_sftp::server::run_with_config(
            channel.into_stream(),
            sftp,
            russh_sftp::server::Config {
                max_client_packet_len: SFTP_PACKET_LIMIT,
            },
        )
        .await;
        Ok(())
    }
}

impl Drop for ConnHandler {
    fn drop(&mut self) {
        info!(
            remote_addr = %self.remote_addr(),
            user = self.user.as_deref().unwrap_or("<unknown>"),
            "SSH session ended"
        );
        let file_id = self.file_id.clone();
        let staged = self.staged.clone();
        let files = self.files.clone();
        let ssh_conns = self.ssh_conns.clone();
        let hubs = self.hubs.clone();
        tokio::spawn(async move {
            teardown(file_id, staged, files, ssh_conns, hubs).await;
        });
    }
}

/// Reclaim everything a connection may have allocated, on every exit path.
/// Each step is idempotent, so racing the hub reaper is fine.
async fn teardown(
    file_id: String,
    staged: Arc<StagedFile>,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    hubs: Arc<HubManager>,
) {
    let mut errors: Vec<String> = Vec::new();

    hubs.cleanup_session(&file_id).await;
    files.remove(&file_id).await;
    ssh_conns.remove(&file_id).await;
    if let Err(e) = staged.close().await {
        errors.push(format!("failed to close staged file: {e}"));
    }

    if errors.is_empty() {
        debug!(fileid = %file_id, "session resources reclaimed");
    } else {
        error!(fileid = %file_id, err = %errors.join("; "), "session teardown finished with errors");
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}
