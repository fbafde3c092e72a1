pub mod http;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Url};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// One outbound call, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Relative paths are anchored at the API base: `auth/refresh` becomes
    /// `/auth/refresh`. Absolute URLs are kept as given.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !is_absolute_url(&path) && !path.starts_with('/') {
            path.insert(0, '/');
        }
        Self {
            method,
            path,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn is_absolute(&self) -> bool {
        is_absolute_url(&self.path)
    }

    /// Path component of the target without query or fragment.
    pub fn endpoint_path(&self) -> String {
        if self.is_absolute() {
            if let Ok(url) = Url::parse(&self.path) {
                return url.path().to_string();
            }
        }
        let end = self.path.find(|c: char| c == '?' || c == '#').unwrap_or(self.path.len());
        let path = &self.path[..end];
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        }
    }

    /// Current bearer credential carried by this request, if any.
    pub fn bearer(&self) -> Option<&str> {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    /// Replace the `Authorization` header. A credential that cannot be a
    /// header value leaves the request unauthenticated.
    pub(crate) fn set_bearer(&mut self, token: &str) {
        match HeaderValue::from_str(&format!("Bearer {}", token)) {
            Ok(value) => {
                self.headers.insert(AUTHORIZATION, value);
            }
            Err(_) => {
                self.headers.remove(AUTHORIZATION);
            }
        }
    }

    pub(crate) fn clear_bearer(&mut self) {
        self.headers.remove(AUTHORIZATION);
    }
}

fn is_absolute_url(path: &str) -> bool {
    path.starts_with("http://") || path.starts_with("https://")
}

/// Status plus parsed body. Non-2xx statuses are still responses here;
/// the gateway decides what counts as failure.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// The exchange never produced an HTTP response.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("timeout exceeded")]
    Timeout,
    #[error("network error: {0}")]
    Unreachable(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Timeout => "ECONNABORTED",
            TransportError::Unreachable(_) => "ERR_NETWORK",
            TransportError::Other(_) => crate::error::UNKNOWN_ERROR,
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}
