use askama::Template;
use axum::{response::IntoResponse, Json};
use serde_json::json;

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {}

pub async fn index() -> impl IntoResponse {
    IndexTemplate {}
}

/// Liveness check. Also the target of the keep-alive ping.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "verify-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
