use crate::config::MAX_FILE_SIZE;
use crate::handlers::file::lookup_file;
use crate::models::error::{api_error, ApiError};
use crate::models::{SessionCreateResponse, SessionMessage};
use crate::routes::AppState;
use crate::services::StagedFile;
use crate::ssh::sftp::build_edit_url;
use crate::ws::hub::session_write_pump;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// `POST /api/session`: stage a document without an SSH client.
///
/// The multipart `document` field becomes the staged file; the session id
/// and edit URL come back exactly as they would over SSH.
pub async fn create_session(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SessionCreateResponse>, ApiError> {
    let mut document = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| api_error(StatusCode::BAD_REQUEST, "invalid multipart form"))?
    {
        if field.name() == Some("document") {
            let filename = field
                .file_name()
                .filter(|name| !name.is_empty())
                .unwrap_or("document.txt")
                .to_string();
            let data = field
                .bytes()
                .await
                .map_err(|_| api_error(StatusCode::BAD_REQUEST, "failed to read document"))?;
            document = Some((filename, data));
            break;
        }
    }
    let (filename, data) =
        document.ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "document is required"))?;
    if data.len() > MAX_FILE_SIZE {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("document exceeds max size of {MAX_FILE_SIZE} bytes"),
        ));
    }

    let sessionid = Uuid::new_v4().to_string();
    let staged = Arc::new(StagedFile::new(
        std::path::Path::new(&state.config.uploads_dir),
        &sessionid,
    ));
    staged.stage_bytes(&filename, &data).await.map_err(|e| {
        error!(sessionid = %sessionid, err = %e, "failed to stage document");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to stage document")
    })?;
    state.files.insert(&sessionid, staged).await;

    let editurl = build_edit_url(&state.config.server_urls, &sessionid);
    info!(sessionid = %sessionid, filename = %filename, "session created");
    Ok(Json(SessionCreateResponse { sessionid, editurl }))
}

/// `GET /api/session/{id}`: session socket for the client program.
///
/// This upgrade is the one and only place a hub is created; everything the
/// session owns is torn down when the socket goes away.
pub async fn session_ws(
    State(state): State<AppState>,
    Path(sessionid): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    lookup_file(&state, &sessionid).await?;
    if state.hubs.exists_hub(&sessionid).await {
        return Err(api_error(
            StatusCode::CONFLICT,
            "session connection already active",
        ));
    }
    info!(sessionid = %sessionid, "session WebSocket connection request");
    Ok(ws.on_upgrade(move |socket| handle_session_socket(socket, state, sessionid)))
}

async fn handle_session_socket(socket: WebSocket, state: AppState, sessionid: String) {
    let (sink, mut stream) = socket.split();
    let (session_tx, session_rx) = mpsc::channel(8);

    let hub = match state.hubs.create_hub(&sessionid, session_tx).await {
        Ok(hub) => {
            tokio::spawn(session_write_pump(sink, session_rx));
            hub
        }
        Err(e) => {
            // lost the creation race after the pre-upgrade check
            warn!(sessionid = %sessionid, err = %e, "refusing session socket");
            let mut sink = sink;
            let _ = sink.close().await;
            return;
        }
    };

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<SessionMessage>(&text) {
                Ok(SessionMessage::SaveResult { success, reason }) => {
                    hub.handle_save_result(success, reason).await;
                }
                Ok(other) => {
                    warn!(sessionid = %sessionid, msg = ?other, "unexpected session message");
                }
                Err(e) => {
                    warn!(sessionid = %sessionid, err = %e, "invalid session message");
                }
            },
            Ok(Message::Close(_)) => {
                info!(sessionid = %sessionid, "session WebSocket closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!(sessionid = %sessionid, err = %e, "failed to read session message");
                break;
            }
        }
    }
    state.hubs.cleanup_session(&sessionid).await;
}
