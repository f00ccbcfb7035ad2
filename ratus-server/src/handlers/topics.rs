use axum::extract::{Path, State};
use axum::Json;

use ratus_model::{Deleted, Topic, Topics};

use crate::errors::ApiResult;
use crate::extract::Pagination;
use crate::infra::app_state::AppState;

/// List all topics.
pub async fn get_topics(
    State(state): State<AppState>,
    p: Pagination,
) -> ApiResult<Json<Topics>> {
    let data = state.engine.list_topics(p.limit, p.offset).await?;
    Ok(Json(Topics { data }))
}

/// Delete all topics and tasks.
pub async fn delete_topics(State(state): State<AppState>) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_topics().await?))
}

/// Get information about a topic.
pub async fn get_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Json<Topic>> {
    Ok(Json(state.engine.get_topic(&topic).await?))
}

/// Delete a topic and its tasks.
pub async fn delete_topic(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_topic(&topic).await?))
}
