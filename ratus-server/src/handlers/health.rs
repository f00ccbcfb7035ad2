use axum::extract::State;
use axum::http::StatusCode;

use crate::errors::ApiResult;
use crate::infra::app_state::AppState;

/// Liveness probe: answers as long as the process is up.
pub async fn get_liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: answers 200 only while the storage engine is reachable.
pub async fn get_readiness(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.engine.ready().await?;
    Ok(StatusCode::OK)
}
