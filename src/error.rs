use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::transport::{ApiResponse, TransportError};

pub const UNKNOWN_ERROR: &str = "UNKNOWN_ERROR";
pub const REFRESH_FAILED: &str = "REFRESH_FAILED";
pub const REFRESH_ABORTED: &str = "REFRESH_ABORTED";
pub const LOGIN_FAILED: &str = "LOGIN_FAILED";

const FALLBACK_MESSAGE: &str = "Something went wrong";
const FALLBACK_STATUS: u16 = 500;
const AUTH_EXPIRED_STATUS: u16 = 401;

/// Uniform failure shape handed to every caller of the gateway.
///
/// Cloneable so a single refresh outcome can be fanned out to all queued
/// callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{code} ({status}): {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
    pub status: u16,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>, status: u16) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            status,
        }
    }

    /// Normalize a non-2xx response.
    ///
    /// The message prefers the server's `message` field, then the generic
    /// "Request failed" text a transport reports for bad statuses.
    pub fn from_response(response: &ApiResponse) -> Self {
        let code = if response.status >= 500 {
            "ERR_BAD_RESPONSE"
        } else {
            "ERR_BAD_REQUEST"
        };
        let message = server_message(&response.body)
            .unwrap_or_else(|| format!("Request failed with status code {}", response.status));
        let status = if response.status == 0 {
            FALLBACK_STATUS
        } else {
            response.status
        };

        Self::new(code, message, status)
    }

    /// Normalize a failure that never produced a response.
    pub fn from_transport(err: &TransportError) -> Self {
        let message = err.to_string();
        let message = if message.trim().is_empty() {
            FALLBACK_MESSAGE.to_string()
        } else {
            message
        };

        Self::new(err.code(), message, FALLBACK_STATUS)
    }

    /// The refresh endpoint answered 2xx without a usable token.
    pub fn refresh_without_token() -> Self {
        Self::new(REFRESH_FAILED, "Session expired", FALLBACK_STATUS)
    }

    /// The refreshing call went away before the refresh settled.
    pub fn refresh_aborted() -> Self {
        Self::new(
            REFRESH_ABORTED,
            "Session refresh was interrupted",
            FALLBACK_STATUS,
        )
    }

    pub fn is_auth_expired(&self) -> bool {
        self.status == AUTH_EXPIRED_STATUS
    }
}

fn server_message(body: &Value) -> Option<String> {
    body.get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: Value) -> ApiResponse {
        ApiResponse { status, body }
    }

    #[test]
    fn server_message_wins() {
        let err = ApiError::from_response(&response(
            404,
            json!({"success": false, "message": "Collection not found"}),
        ));
        assert_eq!(err.code, "ERR_BAD_REQUEST");
        assert_eq!(err.message, "Collection not found");
        assert_eq!(err.status, 404);
    }

    #[test]
    fn falls_back_to_transport_message() {
        let err = ApiError::from_response(&response(500, Value::Null));
        assert_eq!(err.code, "ERR_BAD_RESPONSE");
        assert_eq!(err.message, "Request failed with status code 500");
        assert_eq!(err.status, 500);

        let err = ApiError::from_response(&response(502, json!({"message": ""})));
        assert_eq!(err.message, "Request failed with status code 502");
    }

    #[test]
    fn transport_failures_are_500() {
        let err = ApiError::from_transport(&TransportError::Timeout);
        assert_eq!(err.code, "ECONNABORTED");
        assert_eq!(err.status, 500);
        assert!(!err.is_auth_expired());

        let err = ApiError::from_transport(&TransportError::Unreachable("dns".into()));
        assert_eq!(err.code, "ERR_NETWORK");
        assert!(err.message.contains("dns"));
    }

    #[test]
    fn only_401_is_auth_expired() {
        assert!(ApiError::from_response(&response(401, Value::Null)).is_auth_expired());
        assert!(!ApiError::from_response(&response(403, Value::Null)).is_auth_expired());
    }

    #[test]
    fn display_carries_all_fields() {
        let err = ApiError::new("ERR_BAD_REQUEST", "nope", 400);
        assert_eq!(err.to_string(), "ERR_BAD_REQUEST (400): nope");
    }
}
