use tokio::sync::broadcast;
use tracing::debug;

use crate::error::ApiError;

/// Called once per irrecoverable refresh failure, after the stored
/// credential and cached identity are gone.
pub trait TeardownHook: Send + Sync {
    fn session_expired(&self, reason: &ApiError);
}

impl<F> TeardownHook for F
where
    F: Fn(&ApiError) + Send + Sync,
{
    fn session_expired(&self, reason: &ApiError) {
        self(reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session is gone; the UI should move to `redirect_to`.
    Expired { redirect_to: String, reason: ApiError },
}

/// Broadcasts session events to whoever drives navigation.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    login_route: String,
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(login_route: impl Into<String>) -> Self {
        let (tx, _) = broadcast::channel(16);
        Self {
            login_route: login_route.into(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    pub fn login_route(&self) -> &str {
        &self.login_route
    }
}

impl TeardownHook for SessionEvents {
    fn session_expired(&self, reason: &ApiError) {
        let event = SessionEvent::Expired {
            redirect_to: self.login_route.clone(),
            reason: reason.clone(),
        };
        // No subscribers is fine.
        if self.tx.send(event).is_err() {
            debug!(redirect_to = %self.login_route, "session expired with no listeners");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn subscribers_receive_redirect() {
        let events = SessionEvents::new("/login");
        let mut rx = events.subscribe();

        let reason = ApiError::new("ERR_BAD_REQUEST", "expired", 401);
        events.session_expired(&reason);

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SessionEvent::Expired {
                redirect_to: "/login".into(),
                reason
            }
        );
    }

    #[test]
    fn no_subscribers_does_not_panic() {
        let events = SessionEvents::new("/login");
        events.session_expired(&ApiError::refresh_without_token());
        assert_eq!(events.login_route(), "/login");
    }

    #[test]
    fn closures_are_hooks() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let hook = move |_: &ApiError| {
            counter.fetch_add(1, Ordering::SeqCst);
        };
        hook.session_expired(&ApiError::refresh_aborted());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
