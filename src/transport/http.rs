use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::transport::{ApiRequest, ApiResponse, Transport, TransportError};

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// reqwest-backed transport.
///
/// Keeps a cookie jar for the lifetime of the client so the HTTP-only
/// refresh cookie set at login travels with the refresh call.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    base_url: String,
    client: Client,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .cookie_store(true)
            .build()
            .context("building http client")?;

        debug!(
            base_url = %base_url,
            timeout_secs = %timeout.as_secs(),
            "http transport initialized"
        );

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() || err.is_request() {
        TransportError::Unreachable(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let url = self.url_for(&request.path);
        let request_id = Uuid::new_v4().to_string();

        trace!(
            method = %request.method,
            url = %url,
            request_id = %request_id,
            authenticated = request.bearer().is_some(),
            "sending request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(request.headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            builder = builder.header(REQUEST_ID_HEADER, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let bytes = resp.bytes().await.map_err(classify)?;

        debug!(
            method = %request.method,
            url = %url,
            request_id = %request_id,
            status_code = %status,
            "received response"
        );

        Ok(ApiResponse {
            status,
            body: parse_body(&bytes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(base, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn joins_paths_onto_base_url() {
        let t = transport("http://localhost:8080/api/");
        assert_eq!(t.base_url(), "http://localhost:8080/api");
        assert_eq!(t.url_for("/auth/login"), "http://localhost:8080/api/auth/login");
        assert_eq!(t.url_for("users/me"), "http://localhost:8080/api/users/me");
        assert_eq!(t.url_for("https://cdn.example.com/x"), "https://cdn.example.com/x");
    }

    #[test]
    fn body_parsing() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(b"  \n"), Value::Null);
        assert_eq!(parse_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_body(b"plain"), Value::String("plain".into()));
    }

    #[tokio::test]
    async fn sends_json_body_and_headers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/login")
            .match_header("content-type", "application/json")
            .match_header("x-request-id", Matcher::Any)
            .match_header("authorization", "Bearer T1")
            .match_body(Matcher::Json(json!({"username": "ann", "password": "pw"})))
            .with_status(200)
            .with_body(r#"{"success":true}"#)
            .create_async()
            .await;

        let mut req = ApiRequest::post("/auth/login")
            .json(&json!({"username": "ann", "password": "pw"}))
            .unwrap();
        req.set_bearer("T1");

        let resp = transport(&server.url()).execute(&req).await.unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, json!({"success": true}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_statuses_are_responses() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/users/me")
            .with_status(401)
            .with_body(r#"{"message":"Unauthenticated"}"#)
            .create_async()
            .await;

        let resp = transport(&server.url())
            .execute(&ApiRequest::get("/users/me"))
            .await
            .unwrap();
        assert_eq!(resp.status, 401);
        assert_eq!(resp.body["message"], "Unauthenticated");
    }

    #[tokio::test]
    async fn cookie_jar_carries_refresh_cookie() {
        let mut server = Server::new_async().await;
        let login = server
            .mock("POST", "/auth/login")
            .with_status(200)
            .with_header("set-cookie", "refreshToken=rt-1; Path=/; HttpOnly")
            .with_body(r#"{"success":true,"data":{"token":"T1"}}"#)
            .create_async()
            .await;
        let refresh = server
            .mock("POST", "/auth/refresh")
            .match_header("cookie", Matcher::Regex("refreshToken=rt-1".into()))
            .with_status(200)
            .with_body(r#"{"success":true,"data":{"token":"T2"}}"#)
            .create_async()
            .await;

        let t = transport(&server.url());
        t.execute(&ApiRequest::post("/auth/login")).await.unwrap();
        let resp = t.execute(&ApiRequest::post("/auth/refresh")).await.unwrap();

        assert_eq!(resp.body["data"]["token"], "T2");
        login.assert_async().await;
        refresh.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        let t = transport("http://127.0.0.1:1");
        let err = t.execute(&ApiRequest::get("/users/me")).await.unwrap_err();
        assert!(matches!(err, TransportError::Unreachable(_)));
        assert_eq!(err.code(), "ERR_NETWORK");
    }
}
