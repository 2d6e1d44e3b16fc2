use serde::{Deserialize, Serialize};

/// Messages exchanged on the session WebSocket.
///
/// The server sends `save`, the client program answers with `save_result`.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum SessionMessage {
    #[serde(rename = "save")]
    Save { content: String },
    #[serde(rename = "save_result")]
    SaveResult {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}
