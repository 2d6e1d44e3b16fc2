pub mod api;
pub mod api_key;

pub use api::create_router;

use crate::config::Config;
use crate::services::{FileRegistry, SshConnRegistry};
use crate::ws::HubManager;
use std::sync::Arc;

/// Shared services threaded through the HTTP router.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub files: Arc<FileRegistry>,
    pub ssh_conns: Arc<SshConnRegistry>,
    pub hubs: Arc<HubManager>,
}
