//! Client error types

use serde_json::Value as JsonValue;
use thiserror::Error;
use upkeep_core::CoreError;

/// Client error types
#[derive(Debug, Error)]
pub enum ClientError {
    /// No response at all: DNS, connect, TLS or a dropped connection
    #[error("Request failed: {0}")]
    Connectivity(#[from] reqwest::Error),

    /// Server rejected the credentials (401)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Valid session without the required permission (403)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Server returned an error status
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The refresh token was rejected or missing; the session was cleared
    #[error("Session ended, please log in again")]
    SessionEnded,

    /// An authenticated call was made with no credentials held
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The request did not complete within its timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable credential store failed
    #[error(transparent)]
    Storage(#[from] CoreError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Create error from HTTP status code
    pub fn from_status(status: reqwest::StatusCode, message: String) -> Self {
        match status.as_u16() {
            400 => Self::BadRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::Forbidden(message),
            404 => Self::NotFound(message),
            _ => Self::ServerError {
                status: status.as_u16(),
                message,
            },
        }
    }

    /// Build an error from a failed response body.
    ///
    /// Prefers the server's `message`/`error`/`msg` field, then the raw body,
    /// then a message derived from the status line.
    pub fn from_response_body(status: reqwest::StatusCode, body: &str) -> Self {
        Self::from_status(status, server_message(status, body))
    }

    /// Whether the session should be refreshed before giving up
    pub const fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// Whether the session is gone and the user must log in again
    pub const fn is_session_ended(&self) -> bool {
        matches!(self, Self::SessionEnded | Self::NotAuthenticated)
    }

    /// HTTP status carried by the error, if the server answered at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::BadRequest(_) => Some(400),
            Self::AuthenticationFailed(_) => Some(401),
            Self::Forbidden(_) => Some(403),
            Self::NotFound(_) => Some(404),
            Self::ServerError { status, .. } => Some(*status),
            Self::Connectivity(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

fn server_message(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if let Ok(JsonValue::Object(map)) = serde_json::from_str::<JsonValue>(body) {
        for key in ["message", "error", "msg"] {
            if let Some(JsonValue::String(message)) = map.get(key) {
                if !message.is_empty() {
                    return message.clone();
                }
            }
        }
    } else if !body.is_empty() {
        return body.to_string();
    }
    format!("HTTP error! status: {}", status.as_u16())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ClientError::from_status(StatusCode::UNAUTHORIZED, String::new()),
            ClientError::AuthenticationFailed(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::FORBIDDEN, String::new()),
            ClientError::Forbidden(_)
        ));
        assert!(matches!(
            ClientError::from_status(StatusCode::BAD_GATEWAY, String::new()),
            ClientError::ServerError { status: 502, .. }
        ));
    }

    #[test]
    fn test_server_message_is_preferred() {
        let err = ClientError::from_response_body(
            StatusCode::BAD_REQUEST,
            r#"{"success":false,"message":"Asset tag already exists"}"#,
        );
        assert_eq!(err.to_string(), "Bad request: Asset tag already exists");

        let err = ClientError::from_response_body(StatusCode::UNAUTHORIZED, r#"{"error":"jwt expired"}"#);
        assert_eq!(err.to_string(), "Authentication failed: jwt expired");
    }

    #[test]
    fn test_plain_text_and_empty_bodies() {
        let err = ClientError::from_response_body(StatusCode::NOT_FOUND, "no such work order");
        assert_eq!(err.to_string(), "Resource not found: no such work order");

        let err = ClientError::from_response_body(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(
            err.to_string(),
            "Server error 500: HTTP error! status: 500"
        );

        // JSON without a usable message falls back to the status line
        let err = ClientError::from_response_body(StatusCode::CONFLICT, r#"{"code":17}"#);
        assert_eq!(err.status(), Some(409));
        assert!(err.to_string().contains("status: 409"));
    }

    #[test]
    fn test_classification_helpers() {
        assert!(ClientError::AuthenticationFailed("x".into()).is_auth_expired());
        assert!(!ClientError::Forbidden("x".into()).is_auth_expired());
        assert!(ClientError::SessionEnded.is_session_ended());
        assert!(!ClientError::Cancelled.is_session_ended());
    }
}
