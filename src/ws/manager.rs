use crate::services::{FileRegistry, SshConnRegistry};
use crate::ws::hub::{EditingHub, HubError};
use axum::extract::ws::Message;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

/// How often the idle reaper scans for expired sessions.
const REAPER_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Room-id to editing-hub mapping plus the idle reaper.
///
/// Hubs are created exclusively by the session-socket upgrade and never
/// implicitly; a room upgrade that finds no hub is a 404 at the API layer.
pub struct HubManager {
    hubs: Mutex<HashMap<String, Arc<EditingHub>>>,
    files: Arc<FileRegistry>,
    ssh_conns: Arc<SshConnRegistry>,
    session_timeout: Duration,
}

impl HubManager {
    pub fn new(
        files: Arc<FileRegistry>,
        ssh_conns: Arc<SshConnRegistry>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            hubs: Mutex::new(HashMap::new()),
            files,
            ssh_conns,
            session_timeout,
        }
    }

    pub async fn get_hub(&self, room: &str) -> Option<Arc<EditingHub>> {
        let hubs = self.hubs.lock().await;
        hubs.get(room).cloned()
    }

    pub async fn exists_hub(&self, room: &str) -> bool {
        let hubs = self.hubs.lock().await;
        hubs.contains_key(room)
    }

    /// Create the hub for a room. Exactly one creation per room may succeed
    /// until the session is cleaned up.
    pub async fn create_hub(
        &self,
        room: &str,
        session_tx: mpsc::Sender<Message>,
    ) -> Result<Arc<EditingHub>, HubError> {
        let mut hubs = self.hubs.lock().await;
        if hubs.contains_key(room) {
            return Err(HubError::AlreadyExists(room.to_string()));
        }
        let hub = Arc::new(EditingHub::new(room, session_tx, self.files.clone()));
        hubs.insert(room.to_string(), hub.clone());
        debug!(room = %room, "created new editing hub");
        Ok(hub)
    }

    /// Tear down everything tied to a session: the hub with its peers and
    /// session socket, the staged file, and the SSH connection.
    pub async fn cleanup_session(&self, session_id: &str) {
        let hub = {
            let mut hubs = self.hubs.lock().await;
            hubs.remove(session_id)
        };
        if let Some(hub) = hub {
            hub.cleanup().await;
        }
        self.ssh_conns.remove_and_disconnect(session_id).await;
        info!(sessionid = %session_id, "cleaned up session");
    }

    /// Start the background ticker that reaps idle sessions.
    pub fn spawn_reaper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(REAPER_PERIOD);
            // the first tick of an interval completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.reap_expired().await;
            }
        })
    }

    async fn reap_expired(&self) {
        let expired: Vec<String> = {
            let hubs = self.hubs.lock().await;
            let mut expired = Vec::new();
            for (session_id, hub) in hubs.iter() {
                if hub.is_empty().await && hub.idle_for().await > self.session_timeout {
                    expired.push(session_id.clone());
                }
            }
            expired
        };
        for session_id in expired {
            info!(sessionid = %session_id, "cleaning up expired session");
            self.cleanup_session(&session_id).await;
        }
    }
}
