pub mod audit;
pub mod store;
pub mod teardown;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::api::auth::{self, LoginRequest, LoginResponse, RegisterRequest, User};
use crate::config::Config;
use crate::error::{ApiError, LOGIN_FAILED};
use crate::gateway::Gateway;
use crate::transport::http::HttpTransport;
use crate::transport::Transport;

use self::store::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use self::teardown::SessionEvents;

/// Signed-in state of one user, built on top of the gateway.
#[derive(Debug, Clone)]
pub struct AuthSession {
    gateway: Arc<Gateway>,
    events: SessionEvents,
}

impl AuthSession {
    pub fn new(gateway: Arc<Gateway>, events: SessionEvents) -> Self {
        Self { gateway, events }
    }

    /// Wire the reqwest transport, the configured credential store and a
    /// broadcast teardown hook.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(
            &config.api_url,
            Duration::from_secs(config.timeout_secs),
        )?);
        let store: Arc<dyn CredentialStore> = match &config.credential_file {
            Some(path) => Arc::new(FileCredentialStore::open(path).await?),
            None => Arc::new(MemoryCredentialStore::new()),
        };
        Ok(Self::with_parts(transport, store, config))
    }

    pub fn with_parts(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        config: &Config,
    ) -> Self {
        let events = SessionEvents::new(config.login_route.clone());
        let gateway = Gateway::new(transport, store, Arc::new(events.clone()))
            .with_refresh_path(config.refresh_path.clone());
        Self::new(Arc::new(gateway), events)
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub async fn is_authenticated(&self) -> bool {
        self.gateway.store().token().await.is_some()
    }

    pub async fn current_user(&self) -> Option<User> {
        self.gateway.store().user().await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<(), ApiError> {
        let request = LoginRequest {
            username: username.to_string(),
            password: password.to_string(),
        };
        let resp = auth::login(&self.gateway, &request).await?;
        self.accept_login(resp, "Login failed").await?;
        info!(username = %username, "signed in");
        Ok(())
    }

    pub async fn login_with_google(&self, id_token: &str) -> Result<(), ApiError> {
        let resp = auth::login_with_google(&self.gateway, id_token).await?;
        self.accept_login(resp, "Google login failed").await?;
        info!("signed in with Google");
        Ok(())
    }

    async fn accept_login(&self, resp: LoginResponse, failure: &str) -> Result<(), ApiError> {
        let token = match resp.token() {
            Some(t) if resp.success => t,
            _ => return Err(ApiError::new(LOGIN_FAILED, failure, 401)),
        };
        self.gateway
            .store()
            .set_token(token)
            .await
            .map_err(|e| ApiError::new(crate::error::UNKNOWN_ERROR, e.to_string(), 500))
    }

    /// Registration caches the new user; the credential arrives with login.
    pub async fn register(&self, data: &RegisterRequest) -> Result<User, ApiError> {
        let resp = auth::register(&self.gateway, data).await?;
        if !resp.success {
            return Err(ApiError::new("REGISTER_FAILED", "Registration failed", 400));
        }
        let user = User::from(resp.data);
        self.cache_user(&user).await;
        Ok(user)
    }

    pub async fn verify_email(&self, code: &str) -> Result<(), ApiError> {
        let resp = auth::verify_email(&self.gateway, code).await?;
        if resp.success && resp.data.verified {
            Ok(())
        } else {
            Err(ApiError::new("VERIFY_FAILED", "Verification failed", 400))
        }
    }

    pub async fn resend_verification_code(&self, email: &str) -> Result<Option<String>, ApiError> {
        let resp = auth::resend_verification_code(&self.gateway, email).await?;
        Ok(resp.message)
    }

    pub async fn fetch_user_info(&self) -> Result<User, ApiError> {
        let user = auth::user_info(&self.gateway).await?;
        self.cache_user(&user).await;
        Ok(user)
    }

    async fn cache_user(&self, user: &User) {
        if let Err(e) = self.gateway.store().set_user(user).await {
            warn!(error = %e, "failed to cache user identity");
        }
    }

    /// Notify the server if possible, then always drop local state.
    pub async fn logout(&self) -> Result<()> {
        auth::logout(&self.gateway).await;
        self.gateway.store().clear().await?;
        info!("signed out");
        Ok(())
    }
}
