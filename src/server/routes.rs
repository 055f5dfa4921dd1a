/// API Routes definition

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::core::StoreHandle;

pub fn create_router(store: StoreHandle, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/ping", get(handlers::ping))
        .route("/health", get(handlers::get_snapshot))
        .route("/metrics", get(handlers::get_snapshot))
        .route("/metrics/:section", get(handlers::get_section))
        .with_state(store)
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    app
}
