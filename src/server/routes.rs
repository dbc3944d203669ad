//! API routes configuration

use axum::{
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::server::handlers::{self, headers};
use crate::server::state::AppState;

pub fn create_router(state: AppState) -> Router {
    // Browser clients read the chunk/session headers of audio responses.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([
            HeaderName::from_static(headers::TOTAL_CHUNKS),
            HeaderName::from_static(headers::CURRENT_CHUNK),
            HeaderName::from_static(headers::SESSION_ID),
            HeaderName::from_static(headers::MODE),
            HeaderName::from_static(headers::SEGMENT_COUNT),
        ]);

    Router::new()
        .route("/", get(handlers::health_check))
        // Generation
        .route("/generate", post(handlers::generate))
        .route("/generate_multi", post(handlers::generate_multi))
        .route("/stop-generation", post(handlers::stop_generation))
        // Model lifecycle
        .route("/model/status", get(handlers::model_status))
        .route("/model/unload", post(handlers::model_unload))
        .route("/model/timeout", post(handlers::model_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
