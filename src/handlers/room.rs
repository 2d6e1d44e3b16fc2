use crate::handlers::file::lookup_file;
use crate::models::error::{api_error, ApiError};
use crate::routes::AppState;
use crate::ws::EditingHub;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use futures_util::StreamExt;
use std::sync::Arc;
use tracing::{error, info};

/// `GET /api/socket/{id}`: browser room upgrade.
///
/// The room only exists once the client program has opened its session
/// socket; until then browsers get a 404 and retry.
pub async fn room_ws(
    State(state): State<AppState>,
    Path(room): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    lookup_file(&state, &room).await?;
    let hub = state
        .hubs
        .get_hub(&room)
        .await
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "editing hub not found"))?;

    info!(room = %room, "WebSocket connection request");
    Ok(ws.on_upgrade(move |socket| handle_room_socket(socket, hub, room)))
}

async fn handle_room_socket(socket: WebSocket, hub: Arc<EditingHub>, room: String) {
    let (sink, mut stream) = socket.split();
    let peer = hub.add_client(sink).await;

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Binary(frame)) => {
                hub.broadcast_message(frame, Some(peer.id())).await;
            }
            Ok(Message::Close(_)) => {
                info!(room = %room, "WebSocket connection closed");
                break;
            }
            // only binary edit frames are relayed
            Ok(_) => {}
            Err(e) => {
                error!(room = %room, err = %e, "failed to read message");
                break;
            }
        }
    }
    peer.close().await;
}
