pub mod cache;
pub mod config;
pub mod enhance;
pub mod harvest;
pub mod routes;
pub mod state;
pub mod token;
pub mod upstream;

use axum::{Router, http::StatusCode};
use tower_http::cors::{Any, CorsLayer};

use crate::state::AppState;

/// Assemble the full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::discover::router())
        .merge(routes::feed::router())
        .fallback(|| async { (StatusCode::NOT_FOUND, "Not found") })
        .with_state(state)
        .layer(cors)
}
