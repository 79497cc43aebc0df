pub mod chat;
pub mod health;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/chat/message", post(chat::send_message))
        .route("/api/chat/reset", post(chat::reset_chat))
        .route("/api/chat/history/:session_id", get(chat::get_history))
        .route("/api/directory", get(chat::get_directory))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
