//! WebSocket viewer connections
//!
//! A viewer is registered before the upgrade completes, so an unknown or
//! failed stream is answered with a plain HTTP status. After the upgrade,
//! one task forwards queued chunks to the socket and another watches for
//! the client going away; whichever ends first ends the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::registry::{CloseReason, ViewerId, ViewerMessage, ViewerReceiver, ViewerSink};
use crate::session::SessionManager;
use crate::transcode::Transcoder;

use super::listener::ServerState;

/// Close frame reasons are limited to 123 bytes
const MAX_CLOSE_REASON: usize = 123;

#[derive(Debug, Deserialize)]
pub(crate) struct ViewerQuery {
    stream: Option<String>,
}

/// `GET /ws/{stream}`
pub(crate) async fn viewer_by_path<T: Transcoder>(
    State(state): State<ServerState<T>>,
    Path(stream): Path<String>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    accept_viewer(state, stream, peer_addr, ws).await
}

/// `GET /ws?stream=name`, falling back to the default stream
pub(crate) async fn viewer_by_query<T: Transcoder>(
    State(state): State<ServerState<T>>,
    Query(query): Query<ViewerQuery>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(stream) = query
        .stream
        .filter(|name| !name.is_empty())
        .or_else(|| state.config.default_stream.clone())
    else {
        return (StatusCode::NOT_FOUND, "no stream selected").into_response();
    };

    accept_viewer(state, stream, peer_addr, ws).await
}

async fn accept_viewer<T: Transcoder>(
    state: ServerState<T>,
    stream: String,
    peer_addr: SocketAddr,
    ws: WebSocketUpgrade,
) -> Response {
    let permit = match state.try_acquire_connection() {
        Ok(permit) => permit,
        Err(()) => {
            tracing::warn!(peer = %peer_addr, stream = %stream, "Viewer rejected: limit reached");
            return (StatusCode::SERVICE_UNAVAILABLE, "connection limit reached").into_response();
        }
    };

    let (sink, rx) = ViewerSink::channel(state.config.viewer_buffer_chunks);
    let viewer = match state.manager.subscribe(&stream, sink, Some(peer_addr)).await {
        Ok(viewer) => viewer,
        Err(err) => {
            tracing::debug!(peer = %peer_addr, stream = %stream, error = %err, "Viewer rejected");
            return err.into_response();
        }
    };
    let viewer_id = viewer.id;
    drop(viewer);

    let manager = Arc::clone(&state.manager);
    let failed_manager = Arc::clone(&state.manager);
    let failed_stream = stream.clone();

    ws.on_failed_upgrade(move |err| {
        tracing::debug!(stream = %failed_stream, error = %err, "WebSocket upgrade failed");
        tokio::spawn(async move {
            failed_manager.unsubscribe(&failed_stream, viewer_id).await;
        });
    })
    .on_upgrade(move |socket| async move {
        serve_viewer(socket, manager, stream, viewer_id, rx).await;
        drop(permit);
    })
}

/// Pump queued messages to the socket until either side ends
async fn serve_viewer<T: Transcoder>(
    socket: WebSocket,
    manager: Arc<SessionManager<T>>,
    stream: String,
    viewer_id: ViewerId,
    mut rx: ViewerReceiver,
) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message {
                ViewerMessage::Chunk(chunk) => {
                    if sender.send(Message::Binary(chunk)).await.is_err() {
                        return;
                    }
                }
                ViewerMessage::Closed(reason) => {
                    let _ = sender.send(Message::Close(Some(close_frame(&reason)))).await;
                    return;
                }
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                // Viewers have nothing to say; pings are answered by axum
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    manager.unsubscribe(&stream, viewer_id).await;
    tracing::debug!(stream = %stream, viewer_id = viewer_id, "Viewer connection closed");
}

fn close_frame(reason: &CloseReason) -> CloseFrame {
    let code = match reason {
        CloseReason::Stopped => close_code::NORMAL,
        CloseReason::Shutdown => close_code::AWAY,
        CloseReason::Failed(_) => close_code::ERROR,
    };

    let mut text = reason.to_string();
    if text.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }

    CloseFrame {
        code,
        reason: text.into(),
    }
}
