use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use ratus_model::{Deleted, Task, Tasks, Updated};

use crate::errors::{decorate_conflict, ApiResult};
use crate::extract::{NormalizedCommit, NormalizedTask, NormalizedTasks, Pagination};
use crate::infra::app_state::AppState;

/// Insert endpoints answer 201 when at least one task was created.
fn created_status(v: &Updated) -> StatusCode {
    if v.created > 0 {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    }
}

/// List all tasks in a topic.
pub async fn get_tasks(
    State(state): State<AppState>,
    Path(topic): Path<String>,
    p: Pagination,
) -> ApiResult<Json<Tasks>> {
    let data = state.engine.list_tasks(&topic, p.limit, p.offset).await?;
    Ok(Json(Tasks { data }))
}

/// Insert a batch of tasks while ignoring existing ones.
pub async fn post_tasks(
    State(state): State<AppState>,
    NormalizedTasks(ts): NormalizedTasks,
) -> ApiResult<(StatusCode, Json<Updated>)> {
    let v = state.engine.insert_tasks(&ts.data).await?;
    if let Some(first) = ts.data.first() {
        state
            .metrics
            .observe_produced(&first.topic, &first.producer, v.created);
    }
    Ok((created_status(&v), Json(v)))
}

/// Insert or update a batch of tasks.
pub async fn put_tasks(
    State(state): State<AppState>,
    NormalizedTasks(ts): NormalizedTasks,
) -> ApiResult<(StatusCode, Json<Updated>)> {
    let v = state.engine.upsert_tasks(&ts.data).await?;
    if let Some(first) = ts.data.first() {
        state
            .metrics
            .observe_produced(&first.topic, &first.producer, v.created + v.updated);
    }
    Ok((created_status(&v), Json(v)))
}

/// Delete all tasks in a topic.
pub async fn delete_tasks(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_tasks(&topic).await?))
}

/// Get a task by its unique ID.
pub async fn get_task(
    State(state): State<AppState>,
    Path((_topic, id)): Path<(String, String)>,
) -> ApiResult<Json<Task>> {
    Ok(Json(state.engine.get_task(&id).await?))
}

/// Insert a new task.
pub async fn post_task(
    State(state): State<AppState>,
    NormalizedTask(t): NormalizedTask,
) -> ApiResult<(StatusCode, Json<Updated>)> {
    let v = state
        .engine
        .insert_task(&t)
        .await
        .map_err(|e| decorate_conflict(e, "a task with the same ID already exists"))?;
    state.metrics.observe_produced(&t.topic, &t.producer, v.created);
    Ok((created_status(&v), Json(v)))
}

/// Insert or update a task.
pub async fn put_task(
    State(state): State<AppState>,
    NormalizedTask(t): NormalizedTask,
) -> ApiResult<(StatusCode, Json<Updated>)> {
    let v = state.engine.upsert_task(&t).await?;
    state
        .metrics
        .observe_produced(&t.topic, &t.producer, v.created + v.updated);
    Ok((created_status(&v), Json(v)))
}

/// Delete a task by its unique ID.
pub async fn delete_task(
    State(state): State<AppState>,
    Path((_topic, id)): Path<(String, String)>,
) -> ApiResult<Json<Deleted>> {
    Ok(Json(state.engine.delete_task(&id).await?))
}

/// Apply a set of updates to a task and return the updated task.
pub async fn patch_task(
    State(state): State<AppState>,
    Path((_topic, id)): Path<(String, String)>,
    NormalizedCommit(m): NormalizedCommit,
) -> ApiResult<Json<Task>> {
    let v = state
        .engine
        .commit(&id, &m)
        .await
        .map_err(|e| decorate_conflict(e, "the task may have been modified by others"))?;
    state.metrics.observe_committed(&v);
    Ok(Json(v))
}
