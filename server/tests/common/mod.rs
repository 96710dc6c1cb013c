#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, Response, StatusCode};
use engagement_core::EngineConfig;
use engagement_server::db::{Db, SqliteDb, seed_default_achievements};
use engagement_server::service::{EngagementService, RetryPolicy};
use serde_json::Value;
use tower::ServiceExt;

pub fn create_test_app() -> Router {
    let db = SqliteDb::open_in_memory().unwrap();
    db.init().unwrap();
    seed_default_achievements(&db).unwrap();
    let retry = RetryPolicy {
        max_attempts: 3,
        backoff: Duration::ZERO,
    };
    let service =
        Arc::new(EngagementService::new(Arc::new(db), EngineConfig::default(), retry).unwrap());
    engagement_server::build_app(service, &[])
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn json_body(response: Response<Body>) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}
