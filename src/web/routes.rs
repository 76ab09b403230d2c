use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::api::root))
        // Natural language to SQL
        .route("/generate-sql", post(handlers::api::generate_sql))
        .route("/execute-sql", post(handlers::api::execute_sql))
        // Query history
        .route("/sessions", get(handlers::api::list_sessions))
        .route("/sessions/{id}", get(handlers::api::get_session))
        // Introspection
        .route("/schema", get(handlers::api::get_schema))
        .route("/status", get(handlers::api::system_status))
}
