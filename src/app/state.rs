//! Application state management.

use std::sync::Arc;

use super::service::AppService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AppService>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<AppService>) -> Self {
        Self { service }
    }
}
