use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use ratus_core::engine::memdb::{MemDbConfig, MemDbEngine};
use ratus_core::engine::Engine;
use ratus_server::infra::app_state::AppState;
use ratus_server::infra::config::PaginationConfig;
use ratus_server::infra::metrics::Metrics;
use ratus_server::routes;

async fn server() -> (TestServer, Arc<MemDbEngine>) {
    server_with(MemDbConfig::default()).await
}

async fn server_with(config: MemDbConfig) -> (TestServer, Arc<MemDbEngine>) {
    let engine = Arc::new(MemDbEngine::new(config));
    engine.open().await.unwrap();
    let state = AppState {
        engine: engine.clone(),
        pagination: PaginationConfig {
            max_limit: 100,
            max_offset: 10000,
        },
        metrics: Arc::new(Metrics::new().unwrap()),
    };
    (TestServer::new(routes::create_app(state)).unwrap(), engine)
}

fn timestamp(v: &Value) -> DateTime<Utc> {
    v.as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn tasks_are_created_and_fetched() {
    let (server, _) = server().await;

    let res = server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await;
    res.assert_status(axum::http::StatusCode::CREATED);
    res.assert_json(&json!({"created": 1, "updated": 0}));

    let res = server.get("/v1/topics/example/tasks/1").await;
    res.assert_status_ok();
    let body: Value = res.json();
    assert_eq!(body["_id"], "1");
    assert_eq!(body["topic"], "example");
    assert_eq!(body["state"], 0);
    assert_eq!(body["payload"], "hello");
    assert!(body.get("produced").is_some());
    assert!(body.get("scheduled").is_some());
}

#[tokio::test]
async fn the_api_is_also_mounted_at_the_root() {
    let (server, _) = server().await;

    server
        .post("/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server.get("/v1/topics/example/tasks/1").await.assert_status_ok();
    server.get("/livez").await.assert_status_ok();
    server.get("/v1/healthz").await.assert_status_ok();
}

#[tokio::test]
async fn wildcard_promises_claim_the_next_eligible_task() {
    let (server, _) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let res = server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "30s")
        .await;
    res.assert_status_ok();
    let body: Value = res.json();
    assert_eq!(body["_id"], "1");
    assert_eq!(body["state"], 1);
    assert!(!body["nonce"].as_str().unwrap().is_empty());

    // The deadline derives from the requested timeout.
    let consumed = timestamp(&body["consumed"]);
    let deadline = timestamp(&body["deadline"]);
    let d = (deadline - consumed).num_milliseconds();
    assert!((29_000..=31_000).contains(&d), "unexpected deadline {d}ms");
}

#[tokio::test]
async fn commits_complete_tasks_exactly_once() {
    let (server, _) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    let claimed: Value = server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "30s")
        .await
        .json();
    let nonce = claimed["nonce"].as_str().unwrap().to_owned();

    let res = server
        .patch("/v1/topics/example/tasks/1")
        .json(&json!({"nonce": nonce}))
        .await;
    res.assert_status_ok();
    let body: Value = res.json();
    assert_eq!(body["state"], 2);
    assert_eq!(body["nonce"], "");

    // Replaying the same commit is rejected with a conflict.
    let res = server
        .patch("/v1/topics/example/tasks/1")
        .json(&json!({"nonce": nonce}))
        .await;
    res.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = res.json();
    assert_eq!(body["error"]["code"], 409);
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("the task may have been modified by others"));
}

#[tokio::test]
async fn timed_out_claims_are_recovered_by_the_chore_pass() {
    let (server, engine) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "1ms")
        .await
        .assert_status_ok();

    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.chore().await.unwrap();

    let body: Value = server.get("/v1/topics/example/tasks/1").await.json();
    assert_eq!(body["state"], 0);
    assert_eq!(body["nonce"], "");

    // The recovered task can be claimed again.
    server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "30s")
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn completed_tasks_expire_after_the_retention_period() {
    let (server, engine) = server_with(MemDbConfig {
        retention_period: Duration::from_secs(3600),
        ..MemDbConfig::default()
    })
    .await;

    let consumed = Utc::now() - chrono::Duration::hours(2);
    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"state": 2, "consumed": consumed.to_rfc3339()}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    engine.chore().await.unwrap();

    server
        .get("/v1/topics/example/tasks/1")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn keyed_promises_delegate_from_the_wildcard_endpoint() {
    let (server, _) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "hello"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    // A wildcard request whose body names a task targets exactly that task.
    let res = server
        .post("/v1/topics/example/promises")
        .json(&json!({"_id": "1", "timeout": "30s"}))
        .await;
    res.assert_status_ok();
    let body: Value = res.json();
    assert_eq!(body["_id"], "1");
    assert_eq!(body["state"], 1);

    // The task is already claimed, so the keyed semantics report a
    // conflict instead of claiming the next eligible task.
    let res = server
        .post("/v1/topics/example/promises")
        .json(&json!({"_id": "1", "timeout": "30s"}))
        .await;
    res.assert_status(axum::http::StatusCode::CONFLICT);
    assert!(res.json::<Value>()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("the target task is not in pending state"));
}

#[tokio::test]
async fn promise_listing_projects_active_tasks() {
    let (server, _) = server().await;

    server
        .put("/v1/topics/example/tasks")
        .json(&json!({"data": [
            {"_id": "1", "payload": "a"},
            {"_id": "2", "payload": "b"},
        ]}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "30s")
        .await
        .assert_status_ok();

    let body: Value = server.get("/v1/topics/example/promises").await.json();
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert!(data[0].get("deadline").is_some());

    // Deleting the promises recovers the active tasks.
    let body: Value = server.delete("/v1/topics/example/promises").await.json();
    assert_eq!(body["deleted"], 1);
    let body: Value = server.get("/v1/topics/example/promises").await.json();
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn topics_reflect_their_tasks() {
    let (server, _) = server().await;

    server
        .put("/v1/topics/a/tasks")
        .json(&json!({"data": [{"_id": "1"}, {"_id": "2"}]}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .put("/v1/topics/b/tasks")
        .json(&json!({"data": [{"_id": "3"}]}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let body: Value = server.get("/v1/topics/a").await.json();
    assert_eq!(body["name"], "a");
    assert_eq!(body["count"], 2);

    let body: Value = server.get("/v1/topics").await.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let body: Value = server.delete("/v1/topics/a").await.json();
    assert_eq!(body["deleted"], 2);
    server
        .get("/v1/topics/a")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);

    let body: Value = server.delete("/v1/topics").await.json();
    assert_eq!(body["deleted"], 1);
}

#[tokio::test]
async fn batch_inserts_ignore_existing_tasks() {
    let (server, _) = server().await;

    let res = server
        .post("/v1/topics/example/tasks")
        .json(&json!({"data": [{"_id": "1", "payload": "a"}]}))
        .await;
    res.assert_status(axum::http::StatusCode::CREATED);
    res.assert_json(&json!({"created": 1, "updated": 0}));

    // The duplicate is skipped without failing the batch.
    let res = server
        .post("/v1/topics/example/tasks")
        .json(&json!({"data": [
            {"_id": "1", "payload": "xxx"},
            {"_id": "2", "payload": "b"},
        ]}))
        .await;
    res.assert_status(axum::http::StatusCode::CREATED);
    res.assert_json(&json!({"created": 1, "updated": 0}));

    let body: Value = server.get("/v1/topics/example/tasks/1").await.json();
    assert_eq!(body["payload"], "a");

    // Upserts attribute replacements separately from creations.
    let res = server
        .put("/v1/topics/example/tasks")
        .json(&json!({"data": [
            {"_id": "1", "payload": "replaced"},
            {"_id": "3", "payload": "c"},
        ]}))
        .await;
    res.assert_status(axum::http::StatusCode::CREATED);
    res.assert_json(&json!({"created": 1, "updated": 1}));

    // An upsert batch with no new tasks answers 200.
    let res = server
        .put("/v1/topics/example/tasks")
        .json(&json!({"data": [{"_id": "1", "payload": "again"}]}))
        .await;
    res.assert_status_ok();
}

#[tokio::test]
async fn empty_batches_are_permitted() {
    let (server, _) = server().await;

    let res = server
        .post("/v1/topics/example/tasks")
        .json(&json!({"data": []}))
        .await;
    res.assert_status_ok();
    res.assert_json(&json!({"created": 0, "updated": 0}));
}

#[tokio::test]
async fn pagination_bounds_are_enforced() {
    let (server, _) = server().await;

    for query in [
        ("limit", "-1"),
        ("limit", "101"),
        ("limit", "abc"),
        ("offset", "-1"),
        ("offset", "10001"),
    ] {
        let res = server
            .get("/v1/topics/example/tasks")
            .add_query_param(query.0, query.1)
            .await;
        res.assert_status(axum::http::StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn consecutive_pages_are_disjoint() {
    let (server, _) = server().await;

    let data: Vec<Value> = (0..5)
        .map(|i| json!({"_id": i.to_string(), "payload": i}))
        .collect();
    server
        .put("/v1/topics/example/tasks")
        .json(&json!({"data": data}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);

    let first: Value = server
        .get("/v1/topics/example/tasks")
        .add_query_param("limit", "2")
        .await
        .json();
    let second: Value = server
        .get("/v1/topics/example/tasks")
        .add_query_param("limit", "2")
        .add_query_param("offset", "2")
        .await
        .json();

    let ids = |v: &Value| {
        v["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["_id"].as_str().unwrap().to_owned())
            .collect::<Vec<_>>()
    };
    let (a, b) = (ids(&first), ids(&second));
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert!(a.iter().all(|id| !b.contains(id)));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let (server, _) = server().await;

    // A body-bearing endpoint without a body.
    let res = server.post("/v1/topics/example/tasks/1").await;
    res.assert_status(axum::http::StatusCode::BAD_REQUEST);
    assert!(res.json::<Value>()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("missing request body"));

    // A body whose ID contradicts the path.
    let res = server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"_id": "2"}))
        .await;
    res.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // An out-of-range state.
    let res = server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"state": 9}))
        .await;
    res.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // A malformed defer duration.
    let res = server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"defer": "3x"}))
        .await;
    res.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn polls_against_ineligible_topics_report_not_found() {
    let (server, _) = server().await;

    // Empty topic.
    server
        .post("/v1/topics/example/promises")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);

    // A task scheduled in the future is not eligible.
    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"defer": "10m"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    server
        .post("/v1/topics/example/promises")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn commits_against_missing_tasks_report_not_found() {
    let (server, _) = server().await;

    server
        .patch("/v1/topics/example/tasks/42")
        .json(&json!({}))
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_inserts_report_a_conflict() {
    let (server, _) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "a"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    let res = server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "b"}))
        .await;
    res.assert_status(axum::http::StatusCode::CONFLICT);
    assert!(res.json::<Value>()["error"]["message"]
        .as_str()
        .unwrap()
        .contains("a task with the same ID already exists"));
}

#[tokio::test]
async fn commits_can_defer_tasks_back_into_the_queue() {
    let (server, _) = server().await;

    server
        .post("/v1/topics/example/tasks/1")
        .json(&json!({"payload": "a"}))
        .await
        .assert_status(axum::http::StatusCode::CREATED);
    let claimed: Value = server
        .post("/v1/topics/example/promises")
        .add_query_param("timeout", "30s")
        .await
        .json();

    // Retry later: back to pending, scheduled ten minutes out.
    let res = server
        .patch("/v1/topics/example/tasks/1")
        .json(&json!({
            "nonce": claimed["nonce"],
            "state": 0,
            "defer": "10m",
        }))
        .await;
    res.assert_status_ok();
    let body: Value = res.json();
    assert_eq!(body["state"], 0);
    assert!(timestamp(&body["scheduled"]) > Utc::now() + chrono::Duration::minutes(9));

    // Not eligible until the deferral elapses.
    server
        .post("/v1/topics/example/promises")
        .await
        .assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_and_metrics_endpoints_respond() {
    let (server, _) = server().await;

    server.get("/livez").await.assert_status_ok();
    server.get("/healthz").await.assert_status_ok();
    server.get("/readyz").await.assert_status_ok();

    // Drive one request through so the request histogram has samples.
    server.get("/v1/topics").await.assert_status_ok();
    let res = server.get("/metrics").await;
    res.assert_status_ok();
    let text = res.text();
    assert!(text.contains("ratus_request_duration_seconds"));
}

#[tokio::test]
async fn unknown_routes_return_a_json_error() {
    let (server, _) = server().await;

    let res = server.get("/v1/unknown").await;
    res.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: Value = res.json();
    assert_eq!(body["error"]["code"], 404);
}
