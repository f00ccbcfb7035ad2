use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use ratus_core::Error;

use crate::errors::{ApiError, ApiResult};
use crate::infra::app_state::AppState;

/// Prometheus text exposition of the instance metrics.
pub async fn get_metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .encode_text()
        .map_err(|e| ApiError::from(Error::Internal(format!("failed to encode metrics: {e}"))))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
