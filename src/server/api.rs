//! JSON status and control API

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::session::{SessionError, StreamSummary};
use crate::transcode::Transcoder;

use super::listener::ServerState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    sessions: usize,
    viewers: usize,
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        let status = match &self {
            SessionError::StreamNotFound(_) => StatusCode::NOT_FOUND,
            SessionError::AlreadyExists(_) => StatusCode::CONFLICT,
            SessionError::StreamFailed { .. } | SessionError::SessionGone(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            SessionError::Registry(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

pub(crate) fn routes<T: Transcoder>() -> Router<ServerState<T>> {
    Router::new()
        .route("/api/health", get(health::<T>))
        .route("/api/streams", get(list_streams::<T>))
        .route("/api/streams/{stream}", get(get_stream::<T>))
        .route("/api/streams/{stream}/stop", post(stop_stream::<T>))
}

async fn health<T: Transcoder>(State(state): State<ServerState<T>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.manager.session_count().await,
        viewers: state.manager.registry().total_viewers().await,
    })
}

async fn list_streams<T: Transcoder>(
    State(state): State<ServerState<T>>,
) -> Json<Vec<StreamSummary>> {
    Json(state.manager.summaries().await)
}

async fn get_stream<T: Transcoder>(
    State(state): State<ServerState<T>>,
    Path(stream): Path<String>,
) -> Result<Json<StreamSummary>, SessionError> {
    state
        .manager
        .summary(&stream)
        .await
        .map(Json)
        .ok_or(SessionError::StreamNotFound(stream))
}

async fn stop_stream<T: Transcoder>(
    State(state): State<ServerState<T>>,
    Path(stream): Path<String>,
) -> Result<StatusCode, SessionError> {
    match state.manager.stop_session(&stream).await {
        Ok(()) => {
            tracing::info!(stream = %stream, "Stream stopped via API");
            Ok(StatusCode::NO_CONTENT)
        }
        // Catalogued but not running: nothing to stop
        Err(SessionError::StreamNotFound(_)) => {
            if state.manager.has_stream(&stream).await {
                Ok(StatusCode::NO_CONTENT)
            } else {
                Err(SessionError::StreamNotFound(stream))
            }
        }
        Err(err) => Err(err),
    }
}
