//! Behavioral suite shared by storage engine tests.
//!
//! The suite covers the core contract every backend must satisfy: blank
//! state behavior, the sequential task lifecycle, race conditions between
//! competing callers, scheduling order, pagination, and payload fidelity.
//! Backend-specific features like snapshots are tested in the backend's own
//! test file.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};

use ratus_core::engine::Engine;
use ratus_core::Error;
use ratus_model::{Commit, Promise, Task, TaskState};

fn pending(id: &str, topic: &str, payload: Value) -> Task {
    let n = Utc::now();
    Task {
        id: id.to_owned(),
        topic: topic.to_owned(),
        state: TaskState::Pending,
        produced: Some(n),
        scheduled: Some(n),
        payload: Some(payload),
        ..Task::default()
    }
}

fn promise(id: &str) -> Promise {
    Promise {
        id: id.to_owned(),
        deadline: Some(Utc::now()),
        ..Promise::default()
    }
}

fn wildcard(deadline_in: Duration) -> Promise {
    Promise {
        deadline: Some(Utc::now() + deadline_in),
        ..Promise::default()
    }
}

/// Run the full suite against an opened engine. The caller opens the engine
/// beforehand and destroys it afterwards.
pub async fn run_engine_suite(g: Arc<dyn Engine>) {
    blank(&*g).await;
    sequential(&*g).await;
    concurrent(g.clone()).await;
    schedule(&*g).await;
    pagination(&*g).await;
    payload(&*g).await;
}

/// Operations in the blank state neither fail nor fabricate data.
async fn blank(g: &dyn Engine) {
    g.chore().await.unwrap();

    assert!(matches!(
        g.poll("test", &promise("foo")).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        g.commit("foo", &Commit::default()).await,
        Err(Error::NotFound(_))
    ));

    assert!(g.list_topics(10, 0).await.unwrap().is_empty());
    assert!(matches!(g.get_topic("test").await, Err(Error::NotFound(_))));
    assert_eq!(g.delete_topic("test").await.unwrap().deleted, 0);
    assert_eq!(g.delete_topics().await.unwrap().deleted, 0);

    assert!(g.list_tasks("test", 10, 0).await.unwrap().is_empty());
    assert!(matches!(g.get_task("foo").await, Err(Error::NotFound(_))));
    assert_eq!(g.delete_task("foo").await.unwrap().deleted, 0);
    assert_eq!(g.delete_tasks("test").await.unwrap().deleted, 0);

    assert!(g.list_promises("test", 10, 0).await.unwrap().is_empty());
    assert!(matches!(
        g.get_promise("foo").await,
        Err(Error::NotFound(_))
    ));
    assert_eq!(g.delete_promise("foo").await.unwrap().deleted, 0);
    assert_eq!(g.delete_promises("test").await.unwrap().deleted, 0);
}

/// The poll-execute-commit lifecycle in sequential order.
async fn sequential(g: &dyn Engine) {
    // Insert ignores duplicates and keeps the original payload.
    let u = g.insert_task(&pending("1", "test", json!("a"))).await.unwrap();
    assert_eq!(u.created, 1);
    let u = g
        .insert_tasks(&[
            pending("1", "test", json!("xxx")),
            pending("2", "test", json!("b")),
        ])
        .await
        .unwrap();
    assert_eq!(u.created, 1);
    assert!(matches!(
        g.insert_task(&pending("1", "test", json!("xxx"))).await,
        Err(Error::Conflict(_))
    ));
    assert_eq!(g.get_task("1").await.unwrap().payload, Some(json!("a")));
    assert_eq!(g.get_topic("test").await.unwrap().count, Some(2));

    // Keyed promises claim specific tasks exactly once.
    let v = g.insert_promise(&promise("1")).await.unwrap();
    assert_eq!(v.state, TaskState::Active);
    assert!(!v.nonce.is_empty());
    assert!(matches!(
        g.insert_promise(&promise("1")).await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        g.insert_promise(&promise("xxx")).await,
        Err(Error::NotFound(_))
    ));
    assert!(g.get_promise("1").await.unwrap().deadline.is_some());

    let v = g.upsert_promise(&promise("2")).await.unwrap();
    assert_eq!(v.state, TaskState::Active);
    assert!(matches!(
        g.upsert_promise(&promise("xxx")).await,
        Err(Error::NotFound(_))
    ));
    g.get_promise("2").await.unwrap();

    // Both claims carried past deadlines, so the chore pass recovers them.
    g.chore().await.unwrap();
    assert!(matches!(g.get_promise("1").await, Err(Error::NotFound(_))));

    // Both tasks are pending again and can be claimed by wildcard polls.
    g.poll("test", &wildcard(Duration::minutes(5))).await.unwrap();
    g.poll("test", &wildcard(Duration::minutes(5))).await.unwrap();
    assert_eq!(g.list_promises("test", 10, 0).await.unwrap().len(), 2);

    // Commits are invalidated by nonce mismatches and by repetition.
    assert!(matches!(
        g.commit(
            "1",
            &Commit {
                nonce: "xxx".to_owned(),
                ..Commit::default()
            }
        )
        .await,
        Err(Error::Conflict(_))
    ));
    assert!(matches!(
        g.commit("xxx", &Commit::default()).await,
        Err(Error::NotFound(_))
    ));

    let v = g.get_task("1").await.unwrap();
    let m = Commit {
        nonce: v.nonce.clone(),
        topic: "completed".to_owned(),
        state: Some(TaskState::Completed),
        scheduled: Some(Utc::now()),
        payload: Some(json!("completed")),
        ..Commit::default()
    };
    let v = g.commit("1", &m).await.unwrap();
    assert_eq!(v.payload, Some(json!("completed")));
    assert_eq!(v.state, TaskState::Completed);
    assert!(v.nonce.is_empty());
    assert!(g.commit("1", &m).await.is_err(), "duplicated commit accepted");

    // Topic bookkeeping follows the tasks.
    assert_eq!(g.list_topics(10, 0).await.unwrap().len(), 2);
    assert_eq!(g.delete_topic("completed").await.unwrap().deleted, 1);
    assert_eq!(g.delete_topics().await.unwrap().deleted, 1);
    assert_eq!(g.delete_topics().await.unwrap().deleted, 0);
}

/// Race conditions between competing callers.
async fn concurrent(g: Arc<dyn Engine>) {
    let n = Utc::now();

    // Competing inserts of the same ID create the task exactly once.
    let results = race(3, || {
        let g = g.clone();
        async move { g.insert_task(&pending("1", "test", json!("a"))).await.map(|_| ()) }
    })
    .await;
    assert_eq!(count_ok(&results), 1);
    assert!(results
        .iter()
        .all(|r| r.is_ok() || matches!(r, Err(Error::Conflict(_)))));
    assert_eq!(g.list_tasks("test", 10, 0).await.unwrap().len(), 1);
    assert_eq!(g.delete_task("1").await.unwrap().deleted, 1);

    // Competing upserts of the same ID all succeed and leave one task.
    let results = race(3, || {
        let g = g.clone();
        async move { g.upsert_task(&pending("1", "test", json!("a"))).await.map(|_| ()) }
    })
    .await;
    assert_eq!(count_ok(&results), 3);
    assert_eq!(g.list_tasks("test", 10, 0).await.unwrap().len(), 1);
    assert_eq!(g.delete_tasks("test").await.unwrap().deleted, 1);

    // Competing batch inserts attribute each creation exactly once.
    let mut created = 0;
    for r in race(3, || {
        let g = g.clone();
        async move {
            g.insert_tasks(&[
                pending("1", "test", json!("a")),
                pending("2", "test", json!("b")),
            ])
            .await
        }
    })
    .await
    {
        created += r.unwrap().created;
    }
    assert_eq!(created, 2);
    assert_eq!(g.delete_topic("test").await.unwrap().deleted, 2);

    // Competing batch upserts converge on the same two tasks.
    for r in race(3, || {
        let g = g.clone();
        async move {
            g.upsert_tasks(&[
                pending("1", "test", json!("a")),
                pending("2", "test", json!("b")),
            ])
            .await
        }
    })
    .await
    {
        r.unwrap();
    }
    assert_eq!(g.list_tasks("test", 10, 0).await.unwrap().len(), 2);
    assert_eq!(g.delete_topics().await.unwrap().deleted, 2);

    // Competing keyed claims secure the task for exactly one consumer.
    g.insert_task(&pending("1", "test", json!("a"))).await.unwrap();
    let results = race(3, || {
        let g = g.clone();
        async move { g.insert_promise(&promise("1")).await.map(|_| ()) }
    })
    .await;
    assert_eq!(count_ok(&results), 1);
    assert!(results
        .iter()
        .all(|r| r.is_ok() || matches!(r, Err(Error::Conflict(_)))));
    assert_eq!(g.get_task("1").await.unwrap().state, TaskState::Active);
    assert_eq!(g.delete_promise("1").await.unwrap().deleted, 1);
    assert_eq!(g.get_task("1").await.unwrap().state, TaskState::Pending);
    assert_eq!(g.delete_task("1").await.unwrap().deleted, 1);

    // Upsert claims always succeed, the last caller holding the claim.
    g.insert_task(&pending("1", "test", json!("a"))).await.unwrap();
    let results = race(3, || {
        let g = g.clone();
        async move { g.upsert_promise(&promise("1")).await.map(|_| ()) }
    })
    .await;
    assert_eq!(count_ok(&results), 3);
    assert_eq!(g.get_task("1").await.unwrap().state, TaskState::Active);
    assert_eq!(g.delete_promises("test").await.unwrap().deleted, 1);
    assert_eq!(g.get_task("1").await.unwrap().state, TaskState::Pending);
    assert_eq!(g.delete_tasks("test").await.unwrap().deleted, 1);

    // Competing polls claim each task at most once.
    g.insert_tasks(&[
        pending("1", "test", json!("a")),
        pending("2", "test", json!("b")),
    ])
    .await
    .unwrap();
    let results = race(3, || {
        let g = g.clone();
        async move {
            g.poll("test", &wildcard(Duration::minutes(5))).await.map(|_| ())
        }
    })
    .await;
    assert_eq!(count_ok(&results), 2);
    assert!(results
        .iter()
        .all(|r| r.is_ok() || matches!(r, Err(Error::NotFound(_)))));
    assert_eq!(g.list_promises("test", 10, 0).await.unwrap().len(), 2);
    assert_eq!(g.delete_promises("test").await.unwrap().deleted, 2);
    assert_eq!(g.delete_topic("test").await.unwrap().deleted, 2);

    // Competing commits with the same nonce apply exactly once.
    let k = "fixedfixedfixed1".to_owned();
    let mut t = pending("1", "test", json!("a"));
    t.nonce = k.clone();
    g.insert_task(&t).await.unwrap();
    let m = Commit {
        nonce: k,
        topic: "archived".to_owned(),
        state: Some(TaskState::Archived),
        scheduled: Some(n),
        payload: Some(json!("archived")),
        ..Commit::default()
    };
    let results = race(3, || {
        let g = g.clone();
        let m = m.clone();
        async move { g.commit("1", &m).await.map(|_| ()) }
    })
    .await;
    assert_eq!(count_ok(&results), 1);
    assert!(results
        .iter()
        .all(|r| r.is_ok() || matches!(r, Err(Error::Conflict(_)))));
    let v = g.get_task("1").await.unwrap();
    assert_eq!(v.state, TaskState::Archived);
    assert_eq!(v.payload, Some(json!("archived")));
    assert_eq!(g.delete_tasks("archived").await.unwrap().deleted, 1);

    assert_eq!(g.delete_topics().await.unwrap().deleted, 0);
}

/// Poll returns tasks in scheduled order and never returns future tasks.
async fn schedule(g: &dyn Engine) {
    let n = Utc::now();
    let mut early = pending("1", "test", json!("a"));
    early.scheduled = Some(n);
    let mut late = pending("2", "test", json!("b"));
    late.scheduled = Some(n + Duration::milliseconds(100));
    g.insert_tasks(&[early, late]).await.unwrap();

    let v = g.poll("test", &wildcard(Duration::minutes(5))).await.unwrap();
    assert_eq!(v.id, "1");
    assert!(matches!(
        g.poll("test", &wildcard(Duration::minutes(5))).await,
        Err(Error::NotFound(_))
    ));

    tokio::time::sleep(std::time::Duration::from_millis(150)).await;
    let v = g.poll("test", &wildcard(Duration::minutes(5))).await.unwrap();
    assert_eq!(v.id, "2");

    assert_eq!(g.delete_topics().await.unwrap().deleted, 2);
}

/// Listings return consecutive, bounded pages.
async fn pagination(g: &dyn Engine) {
    let mut tasks = Vec::new();
    for (id, topic) in [("1", "a"), ("2", "b"), ("3", "c"), ("4", "c")] {
        let mut t = pending(id, topic, json!(topic));
        t.state = TaskState::Active;
        tasks.push(t);
    }
    g.insert_tasks(&tasks).await.unwrap();

    assert_eq!(g.list_topics(1, 1).await.unwrap().len(), 1);
    assert!(g.list_topics(10, 10).await.unwrap().is_empty());

    assert_eq!(g.list_tasks("c", 1, 1).await.unwrap().len(), 1);
    assert!(g.list_tasks("c", 10, 10).await.unwrap().is_empty());

    assert_eq!(g.list_promises("c", 1, 1).await.unwrap().len(), 1);
    assert!(g.list_promises("c", 10, 10).await.unwrap().is_empty());

    // Consecutive pages are disjoint and cover the whole topic.
    let first = g.list_tasks("c", 1, 0).await.unwrap();
    let second = g.list_tasks("c", 1, 1).await.unwrap();
    assert_ne!(first[0].id, second[0].id);

    assert_eq!(g.delete_topics().await.unwrap().deleted, 4);
}

/// Payload shapes survive the engine's encoding unchanged.
async fn payload(g: &dyn Engine) {
    let nested = json!({
        "empty": null,
        "bool": true,
        "int": 123,
        "float": 3.14,
        "string": "hello",
        "array": [1, 2, "a"],
        "nested": {
            "empty": null,
            "bool": true,
            "int": 123,
            "float": 3.14,
            "string": "hello",
            "array": [1, 2, "a"],
        },
    });
    let cases: Vec<(&str, Option<Value>)> = vec![
        ("1", None),
        ("2", Some(json!(true))),
        ("3", Some(json!(123))),
        ("4", Some(json!(3.14))),
        ("5", Some(json!("hello"))),
        ("6", Some(json!([1, 2, "a"]))),
        ("7", Some(nested)),
    ];

    for (id, payload) in &cases {
        let mut t = pending(id, "test", json!(null));
        t.payload = payload.clone();
        g.insert_task(&t).await.unwrap();

        let v = g.get_task(id).await.unwrap();
        assert_eq!(v.id, *id);
        assert_eq!(&v.payload, payload, "payload mismatch for task {id}");
    }

    assert_eq!(g.delete_topics().await.unwrap().deleted, cases.len() as i64);
}

async fn race<T, F, Fut>(n: usize, f: F) -> Vec<Result<T, Error>>
where
    T: Send + 'static,
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>> + Send + 'static,
{
    let handles: Vec<_> = (0..n).map(|_| tokio::spawn(f())).collect();
    let mut results = Vec::with_capacity(n);
    for h in handles {
        results.push(h.await.unwrap());
    }
    results
}

fn count_ok<T>(results: &[Result<T, Error>]) -> usize {
    results.iter().filter(|r| r.is_ok()).count()
}
