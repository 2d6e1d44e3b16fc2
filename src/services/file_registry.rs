use crate::services::staged_file::StagedFile;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Process-wide mapping of file id to staged file.
///
/// A session handler publishes its staged file here on `listen` (or the HTTP
/// upload path on session creation) and removes it on teardown. Removal runs
/// the staged-file cleanup so dropping the registry entry also reclaims the
/// on-disk subtree.
#[derive(Default, Debug)]
pub struct FileRegistry {
    files: RwLock<HashMap<String, Arc<StagedFile>>>,
}

impl FileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, id: &str, file: Arc<StagedFile>) {
        let mut files = self.files.write().await;
        files.insert(id.to_string(), file);
        debug!(fileid = %id, "staged file published");
    }

    /// Look up a staged file. Absent ids are `None`; callers treat that as 404.
    pub async fn get(&self, id: &str) -> Option<Arc<StagedFile>> {
        let files = self.files.read().await;
        files.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        let files = self.files.read().await;
        files.contains_key(id)
    }

    /// Remove an entry and reclaim its staged file. Returns whether an entry
    /// existed. The cleanup runs outside the lock.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = {
            let mut files = self.files.write().await;
            files.remove(id)
        };
        match removed {
            Some(file) => {
                if let Err(e) = file.close().await {
                    error!(fileid = %id, err = %e, "failed to reclaim staged file");
                } else {
                    info!(fileid = %id, "staged file reclaimed");
                }
                true
            }
            None => false,
        }
    }
}
