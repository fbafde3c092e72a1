use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::api::auth::User;

/// Process-wide persistence for the bearer credential and cached identity.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn token(&self) -> Option<String>;
    async fn set_token(&self, token: &str) -> Result<()>;
    async fn remove_token(&self) -> Result<()>;

    /// Time of the last credential change.
    async fn token_updated_at(&self) -> Option<DateTime<Utc>>;

    /// Seconds the current credential has been in use.
    async fn token_age_seconds(&self) -> Option<u64> {
        self.token_updated_at()
            .await
            .map(|at| (Utc::now() - at).num_seconds().max(0) as u64)
    }

    async fn user(&self) -> Option<User>;
    async fn set_user(&self, user: &User) -> Result<()>;
    async fn remove_user(&self) -> Result<()>;

    /// Drop both the credential and the cached identity.
    async fn clear(&self) -> Result<()> {
        self.remove_token().await?;
        self.remove_user().await
    }
}

/// Snapshot persisted by the stores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(rename = "arkive_auth_token", skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "arkive_user", skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_updated_at: Option<DateTime<Utc>>,
}

impl StoredSession {
    fn replace_token(&mut self, token: Option<&str>) -> bool {
        let next = token.map(String::from);
        if self.token == next {
            return false;
        }
        self.token = next;
        self.token_updated_at = self.token.as_ref().map(|_| Utc::now());
        true
    }
}

/// Credential store that lives as long as the process.
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<StoredSession>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &str) -> Self {
        let mut session = StoredSession::default();
        session.replace_token(Some(token));
        Self {
            inner: Arc::new(RwLock::new(session)),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    async fn set_token(&self, token: &str) -> Result<()> {
        if self.inner.write().await.replace_token(Some(token)) {
            debug!("credential replaced");
        }
        Ok(())
    }

    async fn remove_token(&self) -> Result<()> {
        self.inner.write().await.replace_token(None);
        Ok(())
    }

    async fn token_updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.token_updated_at
    }

    async fn user(&self) -> Option<User> {
        self.inner.read().await.user.clone()
    }

    async fn set_user(&self, user: &User) -> Result<()> {
        self.inner.write().await.user = Some(user.clone());
        Ok(())
    }

    async fn remove_user(&self) -> Result<()> {
        self.inner.write().await.user = None;
        Ok(())
    }
}

/// JSON-file credential store that survives restarts.
///
/// Reads are served from memory; every change is written through before the
/// call returns.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    inner: Arc<RwLock<StoredSession>>,
}

impl FileCredentialStore {
    /// Load the file if present; a missing file is an empty session.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let session = match tokio::fs::read_to_string(&path).await {
            Ok(raw) if raw.trim().is_empty() => StoredSession::default(),
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("parsing credential file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoredSession::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading credential file {}", path.display()))
            }
        };

        debug!(path = %path.display(), has_token = session.token.is_some(), "credential file loaded");

        Ok(Self {
            path,
            inner: Arc::new(RwLock::new(session)),
        })
    }

    async fn persist(&self, session: &StoredSession) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let raw = serde_json::to_vec_pretty(session).context("serializing credentials")?;
        tokio::fs::write(&self.path, raw)
            .await
            .with_context(|| format!("writing credential file {}", self.path.display()))
    }

    async fn update<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut StoredSession) + Send,
    {
        let mut session = self.inner.write().await;
        change(&mut session);
        self.persist(&session).await
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn token(&self) -> Option<String> {
        self.inner.read().await.token.clone()
    }

    async fn set_token(&self, token: &str) -> Result<()> {
        self.update(|s| {
            s.replace_token(Some(token));
        })
        .await
    }

    async fn remove_token(&self) -> Result<()> {
        self.update(|s| {
            s.replace_token(None);
        })
        .await
    }

    async fn token_updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.token_updated_at
    }

    async fn user(&self) -> Option<User> {
        self.inner.read().await.user.clone()
    }

    async fn set_user(&self, user: &User) -> Result<()> {
        let user = user.clone();
        self.update(move |s| s.user = Some(user)).await
    }

    async fn remove_user(&self) -> Result<()> {
        self.update(|s| s.user = None).await
    }
}
