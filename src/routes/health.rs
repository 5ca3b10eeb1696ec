//! Health probe.

use axum::{Json, extract::State, response::IntoResponse};
use http::StatusCode;
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    /// "healthy" when the store answers a ping, "degraded" otherwise.
    pub status: &'static str,
    pub redis: &'static str,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let redis_healthy = state.store.is_healthy().await;

    let health = if redis_healthy {
        HealthStatus {
            status: "healthy",
            redis: "connected",
        }
    } else {
        HealthStatus {
            status: "degraded",
            redis: "disconnected",
        }
    };

    let status_code = if redis_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}
