use axum::extract::{Path, State};
use axum::Json;

use ratus_model::{Deleted, Promise, Promises, Task};

use crate::errors::{decorate_conflict, ApiResult};
use crate::extract::{NormalizedPromise, Pagination};
use crate::infra::app_state::AppState;

/// List all promises in a topic.
pub async fn get_promises(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    p: Pagination,
) -> ApiResult<Json<Promises>> {
    let data = state.engine.list_promises(&topic, p.limit, p.offset).await?;
    Ok(Json(Promises { data }))
}

/// Claim the next available task in the topic based on the scheduled time.
///
/// A promise body carrying a non-empty ID is not a wildcard: it targets a
/// specific task, so the request is handled as a keyed claim.
pub async fn post_promises(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    NormalizedPromise(p): NormalizedPromise,
) -> ApiResult<Json<Task>> {
    if !p.id.is_empty() {
        return insert_promise(&state, &p).await;
    }
    let v = state.engine.poll(&topic, &p).await?;
    state.metrics.observe_consumed(&v);
    Ok(Json(v))
}

/// Delete all promises in a topic, recovering its active tasks.
pub async fn delete_promises(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_promises(&topic).await?))
}

/// Get a promise by the unique ID of its target task.
pub async fn get_promise(
    State(state): State<AppState>,
    Path((_topic, id)): Path<(String, String)>,
) -> ApiResult<Json<Promise>> {
    Ok(Json(state.engine.get_promise(&id).await?))
}

/// Claim the target task if it is in pending state.
pub async fn post_promise(
    State(state): State<AppState>,
    NormalizedPromise(p): NormalizedPromise,
) -> ApiResult<Json<Task>> {
    insert_promise(&state, &p).await
}

/// Claim the target task regardless of its current state.
pub async fn put_promise(
    State(state): State<AppState>,
    NormalizedPromise(p): NormalizedPromise,
) -> ApiResult<Json<Task>> {
    let v = state.engine.upsert_promise(&p).await?;
    state.metrics.observe_consumed(&v);
    Ok(Json(v))
}

/// Delete a promise by the unique ID of its target task, recovering it.
pub async fn delete_promise(
    State(state): State<AppState>,
    Path((_topic, id)): Path<(String, String)>,
) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_promise(&id).await?))
}

async fn insert_promise(state: &AppState, p: &Promise) -> ApiResult<Json<Task>> {
    let v = state
        .engine
        .insert_promise(p)
        .await
        .map_err(|e| decorate_conflict(e, "the target task is not in pending state"))?;
    state.metrics.observe_consumed(&v);
    Ok(Json(v))
}
