//! HTTP layer of the Ratus task queue: configuration, controllers, routing,
//! metrics, and the chore loop driver. The engine behind [`infra::app_state::AppState`]
//! is the single source of truth; everything in this crate stays thin.

pub mod errors;
pub mod extract;
pub mod handlers;
pub mod infra;
pub mod routes;
