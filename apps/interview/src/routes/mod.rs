pub mod health;
pub mod session;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Session lifecycle
        .route(
            "/api/v1/interviews/:id/session",
            post(session::handle_start)
                .get(session::handle_get)
                .delete(session::handle_dispose),
        )
        // Answering
        .route(
            "/api/v1/interviews/:id/session/answers/:question_id",
            put(session::handle_put_answer),
        )
        .route(
            "/api/v1/interviews/:id/session/cursor",
            post(session::handle_select),
        )
        .route(
            "/api/v1/interviews/:id/session/submit",
            post(session::handle_submit),
        )
        .route(
            "/api/v1/interviews/:id/session/exit",
            post(session::handle_exit),
        )
        .with_state(state)
}
