//! HTTP service around `engagement_core`: persistence, retrying
//! orchestration and the axum routes.

pub mod config;
pub mod db;
pub mod logging;
pub mod response;
pub mod routes;
pub mod service;

use std::sync::Arc;

use axum::Router;
use http::HeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::routes::AppState;
use crate::service::EngagementService;

/// The full application: routes plus request tracing and CORS.
pub fn build_app(service: Arc<EngagementService>, allowed_origin: &[String]) -> Router {
    routes::router(AppState { service })
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(allowed_origin))
}

fn cors_layer(allowed_origin: &[String]) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if allowed_origin.is_empty() {
        return cors.allow_origin(Any);
    }
    let origins = allowed_origin
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid ALLOWED_ORIGIN entry");
                None
            }
        })
        .collect::<Vec<_>>();
    cors.allow_origin(AllowOrigin::list(origins))
}
