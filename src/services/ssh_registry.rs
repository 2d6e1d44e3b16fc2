use russh::server::Handle;
use russh::Disconnect;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Process-wide mapping of file id to the live SSH server connection that
/// staged it.
///
/// Inserted on `listen`, removed on teardown. The handle gives the rest of
/// the system out-of-band control over the originating client: the save path
/// checks liveness here and session cleanup can force a disconnect.
#[derive(Default)]
pub struct SshConnRegistry {
    conns: RwLock<HashMap<String, Handle>>,
}

impl SshConnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: &str, handle: Handle) {
        let mut conns = self.conns.write().await;
        conns.insert(id.to_string(), handle);
        debug!(fileid = %id, "SSH connection registered");
    }

    pub async fn get(&self, id: &str) -> Option<Handle> {
        let conns = self.conns.read().await;
        conns.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let conns = self.conns.read().await;
        conns.contains_key(id)
    }

    pub async fn remove(&self, id: &str) -> Option<Handle> {
        let mut conns = self.conns.write().await;
        conns.remove(id)
    }

    /// Remove the entry and disconnect the client, if it is still attached.
    pub async fn remove_and_disconnect(&self, id: &str) {
        if let Some(handle) = self.remove(id).await {
            if handle
                .disconnect(Disconnect::ByApplication, "session closed".into(), "".into())
                .await
                .is_err()
            {
                warn!(fileid = %id, "SSH connection already gone during disconnect");
            }
        }
    }
}
