use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;
use super::server::AppState;

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::health_check))
        .route("/tools", get(handlers::list_tools))
        .route("/chat", post(handlers::handle_chat))
        .route("/sessions/{id}/reset", post(handlers::reset_session))
}
