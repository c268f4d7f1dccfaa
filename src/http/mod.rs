//! HTTP API server for controlling conversation sessions
//!
//! This module provides a REST API over `ConversationSession`:
//! - POST /sessions - Create (and by default connect) a session
//! - DELETE /sessions/:id - Tear a session down
//! - GET /sessions/:id/status - Query session status
//! - GET /sessions/:id/transcript - Get the conversation so far
//! - POST /sessions/:id/text - Send typed text
//! - POST /sessions/:id/interrupt - Barge in on the agent
//! - POST /sessions/:id/audio/start, /audio/stop - Microphone control
//! - POST /sessions/:id/mode - Reconnect in audio or text mode
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::{AppState, SessionFactory};
