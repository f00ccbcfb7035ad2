use axum::routing::get;
use axum::Router;

use ratus_core::api::v1;

use crate::handlers::{health, metrics, promises, tasks, topics};
use crate::infra::app_state::AppState;

/// Create the v1 API endpoint group.
pub fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route(
            v1::TOPICS,
            get(topics::get_topics).delete(topics::delete_topics),
        )
        .route(
            v1::TOPIC,
            get(topics::get_topic).delete(topics::delete_topic),
        )
        .route(
            v1::TASKS,
            get(tasks::get_tasks)
                .post(tasks::post_tasks)
                .put(tasks::put_tasks)
                .delete(tasks::delete_tasks),
        )
        .route(
            v1::TASK,
            get(tasks::get_task)
                .post(tasks::post_task)
                .put(tasks::put_task)
                .patch(tasks::patch_task)
                .delete(tasks::delete_task),
        )
        .route(
            v1::PROMISES,
            get(promises::get_promises)
                .post(promises::post_promises)
                .delete(promises::delete_promises),
        )
        .route(
            v1::PROMISE,
            get(promises::get_promise)
                .post(promises::post_promise)
                .put(promises::put_promise)
                .delete(promises::delete_promise),
        )
        .route(v1::LIVEZ, get(health::get_liveness))
        .route(v1::HEALTHZ, get(health::get_liveness))
        .route(v1::READYZ, get(health::get_readiness))
        .route(v1::METRICS, get(metrics::get_metrics))
}
