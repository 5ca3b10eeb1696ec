//! Administrative cache clear.

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use http::StatusCode;

use crate::{AppState, api_types::error_response};

/// Remove every cache entry and reset the counters.
pub async fn cache_clear(State(state): State<AppState>) -> Response {
    match state.cache.clear().await {
        Ok(deleted) => {
            state.stats.reset();
            tracing::info!(deleted, "cache cleared");
            (
                StatusCode::OK,
                Json(serde_json::json!({
                    "status": "ok",
                    "entries_removed": deleted,
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "cache clear failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to clear cache",
                "internal_error",
            )
        }
    }
}
