use axum::{ http::StatusCode, response::{ IntoResponse, Response }, Json };
use serde::Serialize;
use thiserror::Error;

use crate::models::frame::Frame;

const QUOTA_MESSAGE: &str =
    "429 You exceeded your current quota, please check your plan and billing details. \
     Wait for the limit to reset or raise it with your provider before retrying.";

/// Upstream code used when no credentials were configured at all.
pub const MISSING_API_KEY_CODE: &str = "missing_api_key";

/// A failure signal reported by an upstream chat client, before it is mapped
/// onto the relay's error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("upstream returned HTTP {status}: {message}")] Http {
        status: u16,
        code: Option<String>,
        message: String,
    },
    #[error("malformed upstream payload: {0}")] Protocol(String),
    #[error("upstream transport failure: {0}")] Transport(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            UpstreamError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::Http {
                status: status.as_u16(),
                code: None,
                message: err.to_string(),
            }
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("{0}")] Validation(String),
    #[error("{status} Invalid API key for {provider}. Please check your API key configuration.")] Auth {
        provider: String,
        status: u16,
    },
    #[error(
        "401 No API key configured for {provider}. Set the AI_API_KEY environment variable (or OPENAI_API_KEY / GROQ_API_KEY) and restart the relay."
    )] MissingApiKey {
        provider: String,
    },
    #[error("{}", QUOTA_MESSAGE)] Quota,
    #[error("Received an invalid response from the AI provider")] UpstreamProtocol,
    #[error("{message}")] Upstream {
        status: u16,
        message: String,
    },
    #[error("The AI provider did not respond in time")] Timeout,
    #[error("Could not reach the AI provider: {0}")] Transport(String),
    #[error("{0}")] Internal(String),
}

impl RelayError {
    pub fn status(&self) -> u16 {
        match self {
            RelayError::Validation(_) => 400,
            RelayError::Auth { status, .. } => *status,
            RelayError::MissingApiKey { .. } => 401,
            RelayError::Quota => 429,
            RelayError::UpstreamProtocol => 502,
            RelayError::Upstream { status, .. } => *status,
            RelayError::Timeout => 504,
            RelayError::Transport(_) => 502,
            RelayError::Internal(_) => 500,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Frame form, used once streaming headers are committed.
    pub fn to_frame(&self) -> Frame {
        Frame::error(self.to_string(), self.status())
    }
}

/// Maps an upstream failure signal onto the relay taxonomy.
pub fn classify(provider: &str, err: &UpstreamError) -> RelayError {
    match err {
        UpstreamError::Http { code: Some(code), .. } if code == MISSING_API_KEY_CODE =>
            RelayError::MissingApiKey { provider: provider.to_string() },
        UpstreamError::Http { status: status @ (401 | 403), .. } =>
            RelayError::Auth {
                provider: provider.to_string(),
                status: *status,
            },
        UpstreamError::Http { status: 429, .. } => RelayError::Quota,
        UpstreamError::Http { status, code, message } => {
            let label = code.clone().unwrap_or_else(|| status.to_string());
            let status = if (400..=599).contains(status) { *status } else { 502 };
            RelayError::Upstream {
                status,
                message: format!("{}: {}", label, message),
            }
        }
        UpstreamError::Protocol(_) => RelayError::UpstreamProtocol,
        UpstreamError::Transport(msg) => RelayError::Transport(msg.clone()),
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: bool,
    message: String,
    status: u16,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: true,
            message: self.to_string(),
            status: self.status(),
        };
        (self.status_code(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, code: Option<&str>, message: &str) -> UpstreamError {
        UpstreamError::Http {
            status,
            code: code.map(str::to_string),
            message: message.to_string(),
        }
    }

    #[test]
    fn credentials_failures_name_the_provider() {
        let err = classify("groq", &http(401, Some("invalid_api_key"), "bad key"));
        assert_eq!(err.status(), 401);
        assert!(err.to_string().contains("groq"));
        assert_eq!(classify("openai", &http(403, None, "forbidden")).status(), 403);
    }

    #[test]
    fn missing_key_points_at_the_environment() {
        let err = classify("openai", &http(401, Some(MISSING_API_KEY_CODE), "none"));
        assert_eq!(err, RelayError::MissingApiKey { provider: "openai".into() });
        assert_eq!(err.status(), 401);
        assert!(err.to_string().contains("AI_API_KEY"));
        assert!(err.to_string().contains("openai"));
    }

    #[test]
    fn rate_limits_become_quota_with_guidance() {
        let err = classify("openai", &http(429, Some("insufficient_quota"), "quota"));
        assert_eq!(err, RelayError::Quota);
        assert_eq!(err.status(), 429);
        assert!(err.to_string().contains("billing"));
    }

    #[test]
    fn other_statuses_keep_code_and_message() {
        let err = classify("openai", &http(404, Some("model_not_found"), "no such model"));
        assert_eq!(err.status(), 404);
        assert_eq!(err.to_string(), "model_not_found: no such model");

        let err = classify("openai", &http(503, None, "overloaded"));
        assert_eq!(err.to_string(), "503: overloaded");
    }

    #[test]
    fn protocol_and_transport_failures() {
        let err = classify("openai", &UpstreamError::Protocol("bad json".into()));
        assert_eq!(err, RelayError::UpstreamProtocol);
        assert_eq!(err.status(), 502);
        assert!(!err.to_string().contains("bad json"));

        let err = classify("openai", &UpstreamError::Transport("reset".into()));
        assert_eq!(err.status(), 502);
    }

    #[test]
    fn error_frame_carries_status() {
        assert_eq!(RelayError::Quota.to_frame(), Frame::error(QUOTA_MESSAGE, 429));
    }
}
