use super::state::AppState;
use crate::connection::{ConnectionMode, ConnectionState};
use crate::error::DeviceError;
use crate::session::{SessionOverrides, SessionStatus, TranscriptMessage};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// Optional session ID (if not provided, generate UUID)
    pub session_id: Option<String>,

    /// Connection mode (default: configured mode)
    pub mode: Option<ConnectionMode>,

    /// Connect immediately (default: true)
    #[serde(default = "default_connect")]
    pub connect: bool,
}

fn default_connect() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub connection: ConnectionState,
    pub status: SessionStatus,
}

#[derive(Debug, Deserialize)]
pub struct SendTextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct SwitchModeRequest {
    pub mode: ConnectionMode,
}

#[derive(Debug, Serialize)]
pub struct SentResponse {
    /// False when the connection was not open and nothing was transmitted
    pub sent: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn not_found(session_id: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        format!("Session {} not found", session_id),
    )
}

fn device_error_response(e: &DeviceError) -> Response {
    let status = match e {
        DeviceError::Busy(_) => StatusCode::CONFLICT,
        DeviceError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /sessions
/// Create a session and, unless asked not to, connect it
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    if let Some(id) = &req.session_id {
        if id.trim().is_empty() {
            return error_response(StatusCode::BAD_REQUEST, "session_id must not be empty");
        }
        if state.sessions.read().await.contains_key(id) {
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} already exists", id),
            );
        }
    }

    let session = Arc::new(state.factory.create(SessionOverrides {
        session_id: req.session_id,
        mode: req.mode,
    }));
    let session_id = session.session_id().to_string();

    // Register before connecting so a concurrent create with the same ID loses
    {
        let mut sessions = state.sessions.write().await;
        if sessions.contains_key(&session_id) {
            drop(sessions);
            session.disconnect().await;
            return error_response(
                StatusCode::CONFLICT,
                format!("Session {} already exists", session_id),
            );
        }
        sessions.insert(session_id.clone(), Arc::clone(&session));
    }

    let connection = if req.connect {
        session.connect().await
    } else {
        ConnectionState::Disconnected
    };

    info!("Session {} created ({:?})", session_id, connection);

    (
        StatusCode::CREATED,
        Json(SessionResponse {
            session_id,
            connection,
            status: session.status(),
        }),
    )
        .into_response()
}

/// DELETE /sessions/:session_id
/// Tear a session down and return its final status
pub async fn close_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let session = {
        let mut sessions = state.sessions.write().await;
        sessions.remove(&session_id)
    };

    match session {
        Some(session) => {
            session.disconnect().await;
            info!("Session {} closed", session_id);
            (StatusCode::OK, Json(session.status())).into_response()
        }
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/status
pub async fn get_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.session(&session_id).await {
        Some(session) => (StatusCode::OK, Json(session.status())).into_response(),
        None => not_found(&session_id),
    }
}

/// GET /sessions/:session_id/transcript
/// Get the conversation so far, open messages included
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.session(&session_id).await {
        Some(session) => {
            let transcript: Vec<TranscriptMessage> = session.transcript();
            (StatusCode::OK, Json(transcript)).into_response()
        }
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/text
pub async fn send_text(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SendTextRequest>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    if req.text.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "text must not be empty");
    }

    let sent = session.send_text(req.text).await;
    (StatusCode::OK, Json(SentResponse { sent })).into_response()
}

/// POST /sessions/:session_id/interrupt
pub async fn interrupt(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    match state.session(&session_id).await {
        Some(session) => {
            let sent = session.interrupt().await;
            (StatusCode::OK, Json(SentResponse { sent })).into_response()
        }
        None => not_found(&session_id),
    }
}

/// POST /sessions/:session_id/audio/start
pub async fn start_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.start_audio().await {
        Ok(()) => (StatusCode::OK, Json(session.status())).into_response(),
        Err(e) => {
            warn!("Microphone start failed for {}: {}", session_id, e);
            device_error_response(&e)
        }
    }
}

/// POST /sessions/:session_id/audio/stop
pub async fn stop_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    match session.stop_audio().await {
        Ok(()) => (StatusCode::OK, Json(session.status())).into_response(),
        Err(e) => {
            error!("Microphone stop failed for {}: {}", session_id, e);
            device_error_response(&e)
        }
    }
}

/// POST /sessions/:session_id/mode
/// Reconnect in another mode, keeping the transcript
pub async fn switch_mode(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<SwitchModeRequest>,
) -> Response {
    let Some(session) = state.session(&session_id).await else {
        return not_found(&session_id);
    };

    let connection = session.switch_mode(req.mode).await;
    (
        StatusCode::OK,
        Json(SessionResponse {
            session_id,
            connection,
            status: session.status(),
        }),
    )
        .into_response()
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
