use crate::state::AppState;
use crate::ws;
use axum::{Router, routing::get};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let assets = ServeDir::new(&state.config.static_dir);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Signaling relay
        .route("/ws", get(ws::handler::signaling_handler))
        // Publish / subscribe
        .route("/sfu", get(ws::handler::sfu_handler))
        // Client assets
        .fallback_service(assets)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
