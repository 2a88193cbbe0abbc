//! Application setup and server configuration.

use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, Method},
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::domains::agents::RoutingOrchestrator;
use crate::domains::chatrooms::ChatService;
use crate::kernel::StreamHub;
use crate::server::routes::{
    add_member_handler, auto_pause_handler, create_chat_handler, delay_handler, health_handler,
    list_chats_handler, list_members_handler, list_messages_handler, pause_handler,
    post_message_handler, remove_member_handler, resume_handler, status_handler, stream_handler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RoutingOrchestrator>,
    pub stream_hub: StreamHub,
}

impl AppState {
    pub fn new(orchestrator: Arc<RoutingOrchestrator>, stream_hub: StreamHub) -> Self {
        Self {
            orchestrator,
            stream_hub,
        }
    }

    pub fn chats(&self) -> &Arc<ChatService> {
        self.orchestrator.chats()
    }
}

/// Build the Axum application router
pub fn build_app(state: AppState) -> Router {
    // CORS configuration - allow any origin for development
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        // Flow control
        .route("/api/program/status", get(status_handler))
        .route("/api/program/pause", post(pause_handler))
        .route("/api/program/resume", post(resume_handler))
        .route("/api/program/delay", post(delay_handler))
        .route("/api/program/auto-pause", post(auto_pause_handler))
        // Chat management
        .route("/api/chats/members", get(list_members_handler))
        .route("/api/chats", get(list_chats_handler).post(create_chat_handler))
        .route("/api/chats/:id/members", post(add_member_handler))
        .route("/api/chats/:id/members/:member_id", delete(remove_member_handler))
        .route(
            "/api/chats/:id/messages",
            get(list_messages_handler).post(post_message_handler),
        )
        // Live events
        .route("/api/streams/:topic", get(stream_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
