use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Chat session
        .route("/chat", get(handlers::get_chat))
        .route("/chat/messages", post(handlers::send_message))
        .route("/chat/selection", post(handlers::update_selection))
        .route(
            "/chat/quote",
            post(handlers::confirm_quote).delete(handlers::dismiss_quote),
        )
        .route("/chat/conversation", post(handlers::open_conversation))
        // REST passthrough
        .route("/conversations", get(handlers::list_conversations))
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
