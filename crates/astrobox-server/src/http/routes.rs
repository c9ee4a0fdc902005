//! HTTP API route definitions.

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use super::auth::{auth_middleware, AuthState};
use super::handlers::{self, AppState};

/// Create the API router with all routes
pub fn create_router(app_state: AppState, auth_state: AuthState) -> Router {
    // Token or ticket required
    let protected = Router::new()
        .route("/api/analyze", post(handlers::analyze))
        .route("/api/download", post(handlers::submit_download))
        .route(
            "/api/download/:id",
            get(handlers::get_download).delete(handlers::cancel_download),
        )
        .route("/api/download/:id/start", post(handlers::start_download))
        .route("/api/download/:id/progress", get(handlers::download_progress))
        .route("/api/download/:id/file", get(handlers::download_file))
        .route("/api/auth/ticket", post(handlers::issue_ticket))
        .route("/api/history", get(handlers::list_history))
        .route("/api/history/:id", get(handlers::get_history))
        .route("/api/system", get(handlers::system))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/formats", get(handlers::formats))
        .merge(protected)
        .fallback(handlers::not_found)
        .with_state(app_state)
}
