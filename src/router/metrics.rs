//! Prometheus scrape endpoint.

use axum::extract::State;
use axum::http::StatusCode;

use crate::AppState;

pub async fn handler(
    State(state): State<AppState>,
) -> Result<String, StatusCode> {
    state
        .metrics
        .as_ref()
        .map(|handle| handle.render())
        .ok_or(StatusCode::NOT_FOUND)
}
