//! Gateway error taxonomy and response mapping
//!
//! Every failure a client can see maps to one error kind with a fixed
//! HTTP status and an Anthropic-style JSON body. Errors that occur
//! after a stream has started cannot change the HTTP status anymore;
//! those are emitted as a final SSE `error` event instead, followed by
//! `message_stop`.

use axum::{
    body::Body,
    http::{Response, StatusCode},
    response::IntoResponse,
};
use serde_json::json;

use crate::backend::{clip_body, BackendError};
use crate::protocol::anthropic::{format_sse_event, ErrorEvent, ErrorPayload, MessageStopEvent};
use crate::router::RouterError;
use crate::transform::TransformError;

/// Client-visible failures.
#[derive(Debug)]
pub enum GatewayError {
    /// Malformed client JSON, unsupported content, bad tool shapes
    InvalidRequest(String),
    /// Proxy auth mismatch or backend 401
    Authentication(String),
    /// Backend 403
    Permission(String),
    /// Backend 404, commonly an unknown upstream model id
    NotFound(String),
    /// Backend 429
    RateLimit(String),
    /// Backend 5xx or transport failure
    Backend(String),
    /// Request deadline exceeded
    Timeout(String),
    /// Gateway is draining for shutdown
    Overloaded(String),
}

impl GatewayError {
    /// (wire error type, HTTP status)
    fn kind(&self) -> (&'static str, StatusCode) {
        match self {
            Self::InvalidRequest(_) => ("invalid_request", StatusCode::BAD_REQUEST),
            Self::Authentication(_) => ("authentication_error", StatusCode::UNAUTHORIZED),
            Self::Permission(_) => ("permission_error", StatusCode::FORBIDDEN),
            Self::NotFound(_) => ("not_found", StatusCode::NOT_FOUND),
            Self::RateLimit(_) => ("rate_limit", StatusCode::TOO_MANY_REQUESTS),
            Self::Backend(_) => ("backend_error", StatusCode::BAD_GATEWAY),
            Self::Timeout(_) => ("timeout", StatusCode::GATEWAY_TIMEOUT),
            Self::Overloaded(_) => ("overloaded", StatusCode::SERVICE_UNAVAILABLE),
        }
    }

    pub fn error_type(&self) -> &'static str {
        self.kind().0
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidRequest(m)
            | Self::Authentication(m)
            | Self::Permission(m)
            | Self::NotFound(m)
            | Self::RateLimit(m)
            | Self::Backend(m)
            | Self::Timeout(m)
            | Self::Overloaded(m) => m,
        }
    }

    /// The proxy-auth rejection carries a machine-readable code so
    /// clients can distinguish it from upstream 401s.
    pub fn invalid_api_key() -> Self {
        Self::Authentication("invalid proxy API key".to_string())
    }

    /// Map an upstream failure, naming the routed model where it helps
    /// (a 404 nearly always means the backend does not know the id we
    /// sent, which is not the id the client typed).
    pub fn from_backend(e: BackendError, routed_model: &str) -> Self {
        if e.timed_out {
            return Self::Timeout("backend request timed out".to_string());
        }

        let detail = clip_body(&e.body, 512);
        match e.status {
            Some(401) => Self::Authentication(format!(
                "backend rejected the configured API key (upstream 401): {}",
                detail
            )),
            Some(403) => Self::Permission(format!("backend denied access: {}", detail)),
            Some(404) => Self::NotFound(format!(
                "backend does not recognize model '{}': {}",
                routed_model, detail
            )),
            Some(429) => Self::RateLimit(format!("backend rate limit: {}", detail)),
            Some(status) if (400..500).contains(&status) => {
                Self::InvalidRequest(format!("backend rejected request ({}): {}", status, detail))
            }
            _ => Self::Backend(e.to_string()),
        }
    }

    /// Final SSE frames for an error that struck mid-stream: one
    /// `error` event, then `message_stop`. HTTP status stays 200.
    pub fn to_sse_events(&self) -> Vec<u8> {
        let mut out = format_sse_event(
            "error",
            &ErrorEvent {
                event_type: "error".to_string(),
                error: ErrorPayload {
                    error_type: self.error_type().to_string(),
                    message: self.message().to_string(),
                },
            },
        );
        out.extend(format_sse_event(
            "message_stop",
            &MessageStopEvent {
                event_type: "message_stop".to_string(),
            },
        ));
        out
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type(), self.message())
    }
}

impl std::error::Error for GatewayError {}

impl From<RouterError> for GatewayError {
    fn from(e: RouterError) -> Self {
        match e {
            RouterError::MissingCredential { .. } => Self::Authentication(e.to_string()),
        }
    }
}

impl From<TransformError> for GatewayError {
    fn from(e: TransformError) -> Self {
        Self::InvalidRequest(e.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response<Body> {
        let (error_type, status) = self.kind();

        tracing::error!("Request failed: {} - {}", error_type, self.message());

        let mut error = json!({
            "type": error_type,
            "message": self.message(),
        });
        if status == StatusCode::UNAUTHORIZED && self.message().contains("proxy API key") {
            error["code"] = json!("invalid_api_key");
        }

        let body = json!({ "type": "error", "error": error });

        Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap_or_else(|_| {
                Response::new(Body::from("Internal error building error response"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_error(status: u16, body: &str) -> BackendError {
        BackendError {
            status: Some(status),
            body: body.to_string(),
            message: format!("backend returned HTTP {}", status),
            timed_out: false,
        }
    }

    #[test]
    fn test_backend_status_mapping() {
        let cases = [
            (401, "authentication_error"),
            (403, "permission_error"),
            (404, "not_found"),
            (429, "rate_limit"),
            (400, "invalid_request"),
            (500, "backend_error"),
            (503, "backend_error"),
        ];
        for (status, expected) in cases {
            let err = GatewayError::from_backend(backend_error(status, "x"), "gpt-5");
            assert_eq!(err.error_type(), expected, "status {}", status);
        }
    }

    #[test]
    fn test_not_found_names_routed_model() {
        let err = GatewayError::from_backend(backend_error(404, "no such model"), "openai/gpt-5");
        assert!(err.message().contains("openai/gpt-5"));
    }

    #[test]
    fn test_timeout_wins_over_status() {
        let err = GatewayError::from_backend(
            BackendError {
                status: None,
                body: String::new(),
                message: "deadline".to_string(),
                timed_out: true,
            },
            "m",
        );
        assert_eq!(err.error_type(), "timeout");
    }

    #[test]
    fn test_sse_error_events() {
        let err = GatewayError::Backend("upstream fell over".to_string());
        let bytes = err.to_sse_events();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("event: error"));
        assert!(text.contains("upstream fell over"));
        assert!(text.ends_with("\n\n"));
        assert!(text.contains("event: message_stop"));
        // error event must precede message_stop
        assert!(text.find("event: error").unwrap() < text.find("event: message_stop").unwrap());
    }
}
