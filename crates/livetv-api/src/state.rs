use std::sync::Arc;

use livetv_core::LiveService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LiveService>,
    /// Accept every request without checking tokens.
    pub disable_protection: bool,
}

impl AppState {
    pub fn new(service: Arc<LiveService>) -> Self {
        Self {
            service,
            disable_protection: false,
        }
    }

    pub fn with_disable_protection(mut self, disable: bool) -> Self {
        self.disable_protection = disable;
        self
    }

    /// Whether `given` matches `expected`, honouring `disable_protection`.
    pub fn authorized(&self, given: Option<&str>, expected: &str) -> bool {
        self.disable_protection || given == Some(expected)
    }
}
