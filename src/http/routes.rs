use super::handlers;
use super::state::AppState;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", delete(handlers::close_session))
        // Session queries
        .route("/sessions/:session_id/status", get(handlers::get_status))
        .route("/sessions/:session_id/transcript", get(handlers::get_transcript))
        // Conversation control
        .route("/sessions/:session_id/text", post(handlers::send_text))
        .route("/sessions/:session_id/interrupt", post(handlers::interrupt))
        .route("/sessions/:session_id/audio/start", post(handlers::start_audio))
        .route("/sessions/:session_id/audio/stop", post(handlers::stop_audio))
        .route("/sessions/:session_id/mode", post(handlers::switch_mode))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
