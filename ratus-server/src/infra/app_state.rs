use std::fmt;
use std::sync::Arc;

use ratus_core::engine::Engine;

use super::config::PaginationConfig;
use super::metrics::Metrics;

/// Shared state handed to every controller.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<dyn Engine>,
    pub pagination: PaginationConfig,
    pub metrics: Arc<Metrics>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
