//! Authenticated request gateway.
//!
//! Every call goes out with the current bearer credential. A 401 on any
//! endpoint other than the refresh endpoint starts (or joins) a refresh
//! cycle; at most one cycle runs at a time and every caller that hits the
//! expiry during it is replayed with the same new credential. A failed
//! refresh tears the session down once and fails every waiting caller with
//! the refresh error.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::debug;

use crate::api::auth::{LoginResponse, REFRESH_PATH};
use crate::error::ApiError;
use crate::session::audit::SessionAudit;
use crate::session::store::CredentialStore;
use crate::session::teardown::TeardownHook;
use crate::transport::{ApiRequest, ApiResponse, Transport};

type RefreshOutcome = Result<String, ApiError>;

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    pending: Vec<oneshot::Sender<RefreshOutcome>>,
}

enum RefreshTicket<'a> {
    /// This caller runs the refresh.
    Leader(RefreshCycle<'a>),
    /// A refresh is already running; wait for its outcome.
    Queued(oneshot::Receiver<RefreshOutcome>),
}

/// Ownership of the single active refresh cycle.
///
/// Settling drains the queue and clears the flag under one lock. Dropping an
/// unsettled cycle (cancelled or panicking leader) does the same, and the
/// dropped senders wake every queued caller with an abort.
struct RefreshCycle<'a> {
    state: &'a Mutex<RefreshState>,
    settled: bool,
}

impl RefreshCycle<'_> {
    fn settle(mut self, outcome: &RefreshOutcome) -> usize {
        let pending = {
            let mut state = lock(self.state);
            state.in_progress = false;
            std::mem::take(&mut state.pending)
        };
        self.settled = true;

        let count = pending.len();
        for waiter in pending {
            // A queued caller that was dropped simply misses the outcome.
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

impl Drop for RefreshCycle<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let dropped = {
            let mut state = lock(self.state);
            state.in_progress = false;
            std::mem::take(&mut state.pending).len()
        };
        SessionAudit::new().refresh_abandoned(dropped);
    }
}

fn lock(state: &Mutex<RefreshState>) -> MutexGuard<'_, RefreshState> {
    match state.lock() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

pub struct Gateway {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    teardown: Arc<dyn TeardownHook>,
    refresh_path: String,
    refresh: Mutex<RefreshState>,
    audit: SessionAudit,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("refresh_path", &self.refresh_path)
            .field("refreshing", &self.is_refreshing())
            .field("pending_requests", &self.pending_requests())
            .finish()
    }
}

impl Gateway {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        teardown: Arc<dyn TeardownHook>,
    ) -> Self {
        Self {
            transport,
            store,
            teardown,
            refresh_path: REFRESH_PATH.to_string(),
            refresh: Mutex::new(RefreshState::default()),
            audit: SessionAudit::new(),
        }
    }

    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    pub fn refresh_path(&self) -> &str {
        &self.refresh_path
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn is_refreshing(&self) -> bool {
        lock(&self.refresh).in_progress
    }

    /// Callers currently suspended on the active refresh.
    pub fn pending_requests(&self) -> usize {
        lock(&self.refresh).pending.len()
    }

    fn is_refresh_call(&self, request: &ApiRequest) -> bool {
        let endpoint = request.endpoint_path();
        endpoint == self.refresh_path
            || (request.is_absolute() && endpoint.ends_with(self.refresh_path.as_str()))
    }

    /// Send one request, recovering transparently from credential expiry.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let refresh_call = self.is_refresh_call(&request);
        let sent_with = if refresh_call {
            None
        } else {
            self.store.token().await
        };

        let error = match self.dispatch(&request, sent_with.as_deref()).await {
            Ok(resp) => return Ok(resp),
            Err(e) => e,
        };

        if !error.is_auth_expired() || refresh_call {
            return Err(error);
        }

        // Another caller already finished a refresh after this request left.
        // If the stored credential is rejected as well, refresh as usual.
        if let Some(current) = self.store.token().await {
            if sent_with.as_deref() != Some(current.as_str()) && !self.is_refreshing() {
                self.audit
                    .stale_credential_replayed(request.method.as_str(), &request.path);
                match self.dispatch(&request, Some(&current)).await {
                    Err(e) if e.is_auth_expired() => {}
                    done => return done,
                }
            }
        }

        let token = match self.begin_refresh() {
            RefreshTicket::Queued(rx) => {
                self.audit
                    .request_queued(request.method.as_str(), &request.path);
                rx.await.map_err(|_| ApiError::refresh_aborted())??
            }
            RefreshTicket::Leader(cycle) => self.run_refresh(cycle).await?,
        };

        // Replays go out once; a second 401 is returned as is.
        self.dispatch(&request, Some(&token)).await
    }

    /// Flag check-and-set, or enqueue, under one lock.
    fn begin_refresh(&self) -> RefreshTicket<'_> {
        let mut state = lock(&self.refresh);
        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.pending.push(tx);
            RefreshTicket::Queued(rx)
        } else {
            state.in_progress = true;
            RefreshTicket::Leader(RefreshCycle {
                state: &self.refresh,
                settled: false,
            })
        }
    }

    async fn run_refresh(&self, cycle: RefreshCycle<'_>) -> Result<String, ApiError> {
        let token_age = self.store.token_age_seconds().await;
        self.audit.refresh_started(&self.refresh_path, token_age);

        let outcome = match self
            .dispatch(&ApiRequest::post(self.refresh_path.clone()), None)
            .await
        {
            Ok(resp) => serde_json::from_value::<LoginResponse>(resp.body)
                .ok()
                .and_then(|body| body.token().map(String::from))
                .ok_or_else(ApiError::refresh_without_token),
            Err(err) => Err(err),
        };

        match outcome {
            Ok(token) => {
                if let Err(e) = self.store.set_token(&token).await {
                    self.audit.store_failed("set_token", &e.to_string());
                }
                let outcome = Ok(token.clone());
                let released = cycle.settle(&outcome);
                self.audit.refresh_succeeded(released);
                Ok(token)
            }
            Err(err) => {
                // Teardown finishes before the cycle settles; rejected and
                // late callers never see the expired credential.
                self.teardown_session(&err).await;
                let outcome = Err(err.clone());
                let rejected = cycle.settle(&outcome);
                self.audit.refresh_failed(&err.code, err.status, rejected);
                Err(err)
            }
        }
    }

    async fn teardown_session(&self, reason: &ApiError) {
        if let Err(e) = self.store.clear().await {
            self.audit.store_failed("clear", &e.to_string());
        }
        self.audit.session_torn_down(&reason.code);
        self.teardown.session_expired(reason);
    }

    /// One exchange with the given credential; non-2xx becomes `ApiError`.
    async fn dispatch(
        &self,
        request: &ApiRequest,
        credential: Option<&str>,
    ) -> Result<ApiResponse, ApiError> {
        let mut outbound = request.clone();
        match credential {
            Some(token) => outbound.set_bearer(token),
            None if self.is_refresh_call(request) => outbound.clear_bearer(),
            None => {}
        }

        let resp = self
            .transport
            .execute(&outbound)
            .await
            .map_err(|e| ApiError::from_transport(&e))?;

        if resp.is_success() {
            Ok(resp)
        } else {
            let err = ApiError::from_response(&resp);
            debug!(
                method = %request.method,
                path = %request.path,
                status_code = %err.status,
                code = %err.code,
                "request failed"
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::store::MemoryCredentialStore;
    use crate::transport::TransportError;
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Transport for Echo {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
            Ok(ApiResponse {
                status: 200,
                body: json!({ "bearer": request.bearer() }),
            })
        }
    }

    fn gateway(store: MemoryCredentialStore) -> Gateway {
        Gateway::new(Arc::new(Echo), Arc::new(store), Arc::new(|_: &ApiError| {}))
    }

    #[tokio::test]
    async fn attaches_current_credential() {
        let gw = gateway(MemoryCredentialStore::with_token("T1"));
        let resp = gw.send(ApiRequest::get("/users/me")).await.unwrap();
        assert_eq!(resp.body["bearer"], "T1");
    }

    #[tokio::test]
    async fn no_credential_no_header() {
        let gw = gateway(MemoryCredentialStore::new());
        let resp = gw.send(ApiRequest::get("/users/me")).await.unwrap();
        assert!(resp.body["bearer"].is_null());
    }

    #[tokio::test]
    async fn refresh_endpoint_never_carries_credential() {
        let gw = gateway(MemoryCredentialStore::with_token("T1"));
        let mut req = ApiRequest::post(REFRESH_PATH);
        req.set_bearer("caller-supplied");

        let resp = gw.send(req).await.unwrap();
        assert!(resp.body["bearer"].is_null());
    }

    #[tokio::test]
    async fn refresh_endpoint_is_recognised_in_any_spelling() {
        let gw = gateway(MemoryCredentialStore::with_token("T1"));

        for path in [
            "auth/refresh",
            "/auth/refresh?source=cli",
            "http://localhost:8080/api/auth/refresh",
        ] {
            let mut req = ApiRequest::post(path);
            req.set_bearer("caller-supplied");
            assert!(gw.is_refresh_call(&req), "{} not treated as refresh", path);

            let resp = gw.send(req).await.unwrap();
            assert!(resp.body["bearer"].is_null());
        }

        assert!(!gw.is_refresh_call(&ApiRequest::post("/auth/refresh-legacy")));
        assert!(!gw.is_refresh_call(&ApiRequest::get("/users/me")));
    }

    #[test]
    fn second_ticket_queues_until_settled() {
        let gw = gateway(MemoryCredentialStore::new());

        let leader = match gw.begin_refresh() {
            RefreshTicket::Leader(cycle) => cycle,
            RefreshTicket::Queued(_) => panic!("first ticket must lead"),
        };
        assert!(gw.is_refreshing());

        let mut rx = match gw.begin_refresh() {
            RefreshTicket::Queued(rx) => rx,
            RefreshTicket::Leader(_) => panic!("second ticket must queue"),
        };
        assert_eq!(gw.pending_requests(), 1);

        assert_eq!(leader.settle(&Ok("T2".into())), 1);
        assert!(!gw.is_refreshing());
        assert_eq!(gw.pending_requests(), 0);
        assert_eq!(rx.try_recv().unwrap(), Ok("T2".to_string()));
    }

    #[test]
    fn dropped_cycle_clears_flag_and_wakes_waiters() {
        let gw = gateway(MemoryCredentialStore::new());

        let leader = gw.begin_refresh();
        let mut rx = match gw.begin_refresh() {
            RefreshTicket::Queued(rx) => rx,
            RefreshTicket::Leader(_) => panic!("second ticket must queue"),
        };

        drop(leader);
        assert!(!gw.is_refreshing());
        assert!(rx.try_recv().is_err());
        assert!(matches!(gw.begin_refresh(), RefreshTicket::Leader(_)));
    }
}
