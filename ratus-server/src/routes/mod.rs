pub mod v1;

use axum::middleware;
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use ratus_core::api;
use ratus_core::Error;

use crate::errors::ApiError;
use crate::infra::app_state::AppState;
use crate::infra::metrics::track_requests;

/// Create the application router.
///
/// The endpoint group is mounted both under the version prefix and at the
/// root so clients can omit the version. Middleware, inner to outer:
/// request timing, response compression, tracing, permissive CORS.
pub fn create_app(state: AppState) -> Router {
    let api_router = v1::create_v1_router();

    Router::new()
        .nest(api::v1::PREFIX, api_router.clone())
        .merge(api_router)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found() -> ApiError {
    Error::NotFound("endpoint not found".to_owned()).into()
}
