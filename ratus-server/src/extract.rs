//! Request extractors that normalize externally supplied data before it
//! reaches the engine.
//!
//! Each extractor binds the relevant parts of the request (body, path
//! parameters, query string), runs the corresponding normalization rules
//! from `ratus-core`, and rejects with a 400 response when they fail.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Query, Request};
use axum::http::request::Parts;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use ratus_core::normalize;
use ratus_core::Error;
use ratus_model::{Commit, Promise, Task, Tasks};

use crate::errors::ApiError;
use crate::infra::app_state::AppState;

/// Normalized pagination options bound from the query string.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl FromRequestParts<AppState> for Pagination {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let query: Query<HashMap<String, String>> = Query::try_from_uri(&parts.uri)
            .map_err(|_| bad_request("invalid pagination parameters"))?;
        let limit = parse_integer(query.get("limit"))?;
        let offset = parse_integer(query.get("offset"))?;
        let (limit, offset) = normalize::normalize_pagination(
            limit,
            offset,
            state.pagination.max_limit,
            state.pagination.max_offset,
        )?;
        Ok(Self { limit, offset })
    }
}

fn parse_integer(v: Option<&String>) -> Result<i64, ApiError> {
    match v {
        None => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| bad_request("invalid pagination parameters")),
    }
}

/// A task bound from the request body and normalized against the path.
pub struct NormalizedTask(pub Task);

impl FromRequest<AppState> for NormalizedTask {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let params = path_params(&mut parts, state).await?;
        let id = params.get("id").cloned().unwrap_or_default();
        let topic = params.get("topic").cloned().unwrap_or_default();

        let bytes = read_body(Request::from_parts(parts, body), state).await?;
        if bytes.is_empty() {
            return Err(bad_request("missing request body"));
        }
        let mut task: Task =
            serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("{e}")))?;
        normalize::normalize_task(&mut task, &id, &topic)?;
        Ok(Self(task))
    }
}

/// A task list bound from the request body and normalized against the path
/// topic. Empty lists are permitted; an empty body is not.
pub struct NormalizedTasks(pub Tasks);

impl FromRequest<AppState> for NormalizedTasks {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let params = path_params(&mut parts, state).await?;
        let topic = params.get("topic").cloned().unwrap_or_default();

        let bytes = read_body(Request::from_parts(parts, body), state).await?;
        if bytes.is_empty() {
            return Err(bad_request("missing request body"));
        }
        let mut tasks: Tasks =
            serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("{e}")))?;
        normalize::normalize_tasks(&mut tasks, &topic)?;
        Ok(Self(tasks))
    }
}

/// Query parameters accepted by the promise endpoints. A promise is simple
/// enough to be submitted through either the request body or the query
/// string; values in the query string take precedence.
#[derive(Debug, Default, Deserialize)]
struct PromiseQuery {
    #[serde(rename = "_id")]
    id: Option<String>,
    consumer: Option<String>,
    timeout: Option<String>,
    deadline: Option<DateTime<Utc>>,
}

/// A promise merged from the request body and query string, normalized
/// against the path. An empty body yields a wildcard promise with default
/// settings.
pub struct NormalizedPromise(pub Promise);

impl FromRequest<AppState> for NormalizedPromise {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let params = path_params(&mut parts, state).await?;
        let id = params.get("id").cloned().unwrap_or_default();
        let query: Query<PromiseQuery> =
            Query::try_from_uri(&parts.uri).map_err(|e| bad_request(format!("{e}")))?;

        let bytes = read_body(Request::from_parts(parts, body), state).await?;
        let mut promise: Promise = if bytes.is_empty() {
            Promise::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("{e}")))?
        };

        let q = query.0;
        if let Some(v) = q.id {
            promise.id = v;
        }
        if let Some(v) = q.consumer {
            promise.consumer = v;
        }
        if let Some(v) = q.timeout {
            promise.timeout = v;
        }
        if let Some(v) = q.deadline {
            promise.deadline = Some(v);
        }

        normalize::normalize_promise(&mut promise, &id)?;
        Ok(Self(promise))
    }
}

/// A commit bound from the request body. All fields are optional; an empty
/// body produces an empty commit, which completes the target task.
pub struct NormalizedCommit(pub Commit);

impl FromRequest<AppState> for NormalizedCommit {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let bytes = read_body(req, state).await?;
        let mut commit: Commit = if bytes.is_empty() {
            Commit::default()
        } else {
            serde_json::from_slice(&bytes).map_err(|e| bad_request(format!("{e}")))?
        };
        normalize::normalize_commit(&mut commit)?;
        Ok(Self(commit))
    }
}

async fn path_params(
    parts: &mut Parts,
    state: &AppState,
) -> Result<HashMap<String, String>, ApiError> {
    let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
        .await
        .map_err(|e| bad_request(format!("{e}")))?;
    Ok(params)
}

/// Read the request body, reporting an interrupted transfer as a client
/// disconnect rather than a malformed request.
async fn read_body(req: Request, state: &AppState) -> Result<Bytes, ApiError> {
    Bytes::from_request(req, state)
        .await
        .map_err(|e| Error::ClientClosedRequest(format!("{e}")).into())
}

fn bad_request(message: impl Into<String>) -> ApiError {
    Error::BadRequest(message.into()).into()
}
