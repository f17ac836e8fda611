//! # Web API Application State

use std::time::Instant;

use crate::dispatcher::TaskDispatcher;

/// Shared by every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub dispatcher: TaskDispatcher,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(dispatcher: TaskDispatcher) -> Self {
        Self {
            dispatcher,
            started_at: Instant::now(),
        }
    }
}
