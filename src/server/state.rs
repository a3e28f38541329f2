use std::sync::Arc;

use crate::service::SessionService;

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct ServeState {
    pub service: Arc<SessionService>,
}

impl ServeState {
    pub fn new(service: Arc<SessionService>) -> Self {
        Self { service }
    }
}
