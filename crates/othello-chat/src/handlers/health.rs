use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::services::{IndexManager, IndexStatus};

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    version: String,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}

/// Ready once the index has been loaded or built.
pub async fn readiness_check(State(index): State<Arc<IndexManager>>) -> StatusCode {
    match index.status() {
        IndexStatus::Ready { .. } => StatusCode::OK,
        _ => StatusCode::SERVICE_UNAVAILABLE,
    }
}
