use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::gateway::Gateway;
use crate::transport::ApiRequest;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const VERIFY_EMAIL_PATH: &str = "/auth/verify-email";
pub const RESEND_VERIFICATION_PATH: &str = "/auth/resend-verification-code";
pub const GOOGLE_LOGIN_PATH: &str = "/auth/google";
pub const USER_INFO_PATH: &str = "/users/me";

/// Cached identity of the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub full_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenData {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub authenticated: bool,
}

/// Body of login, Google login and refresh.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: TokenData,
}

impl LoginResponse {
    /// The bearer credential, when the server actually issued one.
    pub fn token(&self) -> Option<&str> {
        Some(self.data.token.as_str()).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub id: String,
    pub full_name: String,
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub is_verified: bool,
}

impl From<RegisteredUser> for User {
    fn from(u: RegisteredUser) -> Self {
        Self {
            id: u.id,
            full_name: u.full_name,
            username: u.username,
            email: u.email,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    #[serde(default)]
    pub success: bool,
    pub data: RegisteredUser,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Verification {
    #[serde(default)]
    pub verified: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerifyEmailResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Verification,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResendVerificationResponse {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
}

fn decode<T: for<'de> Deserialize<'de>>(path: &str, body: Value) -> Result<T, ApiError> {
    serde_json::from_value(body).map_err(|e| {
        debug!(path = %path, error = %e, "unexpected response shape");
        ApiError::new(
            crate::error::UNKNOWN_ERROR,
            format!("unexpected response from {}: {}", path, e),
            500,
        )
    })
}

async fn post_json<T, B>(gateway: &Gateway, path: &str, payload: Option<&B>) -> Result<T, ApiError>
where
    T: for<'de> Deserialize<'de>,
    B: Serialize,
{
    let mut req = ApiRequest::post(path);
    if let Some(payload) = payload {
        req = req.json(payload).map_err(|e| {
            warn!(path = %path, error = %e, "failed to encode request body");
            ApiError::new(
                crate::error::UNKNOWN_ERROR,
                format!("could not encode request for {}: {}", path, e),
                500,
            )
        })?;
    }
    let resp = gateway.send(req).await?;
    decode(path, resp.body)
}

pub async fn login(gateway: &Gateway, credentials: &LoginRequest) -> Result<LoginResponse, ApiError> {
    post_json(gateway, LOGIN_PATH, Some(credentials)).await
}

pub async fn register(gateway: &Gateway, data: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
    post_json(gateway, REGISTER_PATH, Some(data)).await
}

pub async fn verify_email(gateway: &Gateway, code: &str) -> Result<VerifyEmailResponse, ApiError> {
    let payload = serde_json::json!({ "verificationCode": code });
    post_json(gateway, VERIFY_EMAIL_PATH, Some(&payload)).await
}

pub async fn resend_verification_code(
    gateway: &Gateway,
    email: &str,
) -> Result<ResendVerificationResponse, ApiError> {
    let payload = serde_json::json!({ "email": email });
    post_json(gateway, RESEND_VERIFICATION_PATH, Some(&payload)).await
}

/// The server verifies the Google ID token itself.
pub async fn login_with_google(gateway: &Gateway, id_token: &str) -> Result<LoginResponse, ApiError> {
    let payload = serde_json::json!({ "idToken": id_token });
    post_json(gateway, GOOGLE_LOGIN_PATH, Some(&payload)).await
}

/// Explicit refresh through the gateway's configured refresh endpoint.
/// Failures here never trigger another refresh.
pub async fn refresh_token(gateway: &Gateway) -> Result<LoginResponse, ApiError> {
    post_json::<_, Value>(gateway, gateway.refresh_path(), None).await
}

/// Best-effort server notification; failures are logged and dropped.
pub async fn logout(gateway: &Gateway) {
    if let Err(err) = gateway.send(ApiRequest::post(LOGOUT_PATH)).await {
        warn!(
            target: "session",
            event = "logout_notify_failed",
            code = %err.code,
            status = err.status,
            "logout notification failed"
        );
    }
}

/// Accepts both a bare user body and the `{success, data}` envelope.
pub async fn user_info(gateway: &Gateway) -> Result<User, ApiError> {
    let resp = gateway.send(ApiRequest::get(USER_INFO_PATH)).await?;
    let body = match resp.body {
        Value::Object(mut obj) if obj.contains_key("data") => obj.remove("data").unwrap_or(Value::Null),
        other => other,
    };
    decode(USER_INFO_PATH, body)
}
