use tracing::{error, info, warn};

/// Structured session events, all under the `session` target.
#[derive(Debug, Clone, Default)]
pub struct SessionAudit;

impl SessionAudit {
    pub fn new() -> Self {
        Self
    }

    /// `token_age_secs` is how long the expired credential was in use.
    pub fn refresh_started(&self, path: &str, token_age_secs: Option<u64>) {
        info!(target: "session", event = "refresh_started", path, token_age_secs);
    }

    pub fn refresh_succeeded(&self, released: usize) {
        info!(target: "session", event = "refresh_succeeded", released);
    }

    pub fn refresh_failed(&self, code: &str, status: u16, rejected: usize) {
        warn!(target: "session", event = "refresh_failed", code, status, rejected);
    }

    pub fn request_queued(&self, method: &str, path: &str) {
        info!(target: "session", event = "request_queued", method, path);
    }

    pub fn stale_credential_replayed(&self, method: &str, path: &str) {
        info!(target: "session", event = "stale_credential_replayed", method, path);
    }

    pub fn refresh_abandoned(&self, dropped: usize) {
        warn!(target: "session", event = "refresh_abandoned", dropped);
    }

    pub fn session_torn_down(&self, code: &str) {
        warn!(target: "session", event = "session_torn_down", code);
    }

    pub fn store_failed(&self, action: &str, error_msg: &str) {
        error!(target: "session", event = "store_failed", action, error = error_msg);
    }
}
