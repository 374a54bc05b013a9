//! Platform stub that records restart requests instead of restarting.

use std::sync::Mutex;

use cellular_service::facade::{PlatformHooks, RestartCause};

#[derive(Debug, Default)]
pub struct SimPlatform {
    restarts: Mutex<Vec<RestartCause>>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restarts(&self) -> Vec<RestartCause> {
        self.restarts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl PlatformHooks for SimPlatform {
    fn restart(&self, cause: RestartCause) {
        tracing::warn!(cause = ?cause, "platform restart requested (simulated)");
        self.restarts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cause);
    }
}
