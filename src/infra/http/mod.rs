pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use state::HttpState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use middleware::{log_responses, set_request_context};

pub fn build_router(state: HttpState) -> Router {
    // The editor UI is served elsewhere; the render surface accepts
    // cross-origin requests from anywhere.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/render", post(handlers::render))
        .route("/test-simple", post(handlers::test_simple))
        .route("/test", get(handlers::test_server))
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
