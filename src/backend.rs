//! Backend HTTP client
//!
//! Issues Chat Completions calls against whatever endpoint a route
//! resolved to. Unary calls carry the configured request timeout;
//! streaming calls have no overall deadline (the per-chunk idle timeout
//! is enforced by the consumer, which owns the pacing).
//!
//! Upstream failures of any kind are surfaced verbatim as
//! `BackendError`; there are no retries and no fallbacks here.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::config::Config;
use crate::protocol::openai::{ChatCompletion, ChatCompletionRequest};
use crate::router::TierRoute;

/// Captured upstream bodies are truncated before being logged or
/// echoed into client-visible errors.
pub const MAX_CAPTURED_BODY_BYTES: usize = 4096;

/// Clip a captured upstream body to a byte budget without splitting a
/// UTF-8 character (provider error bodies routinely carry non-ASCII
/// model names and quotes).
pub fn clip_body(body: &str, max_bytes: usize) -> &str {
    match body
        .char_indices()
        .find(|(i, c)| i + c.len_utf8() > max_bytes)
    {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

/// An upstream failure: transport-level, timeout, or a non-2xx status
/// with its captured body.
#[derive(Debug)]
pub struct BackendError {
    pub status: Option<u16>,
    pub body: String,
    pub message: String,
    pub timed_out: bool,
}

impl BackendError {
    fn from_transport(e: reqwest::Error) -> Self {
        Self {
            status: None,
            body: String::new(),
            message: e.to_string(),
            timed_out: e.is_timeout(),
        }
    }

    fn from_status(status: u16, body: &str) -> Self {
        Self {
            status: Some(status),
            body: clip_body(body, MAX_CAPTURED_BODY_BYTES).to_string(),
            message: format!("backend returned HTTP {}", status),
            timed_out: false,
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.body.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.message, self.body)
        }
    }
}

impl std::error::Error for BackendError {}

/// Shared HTTP client for all backend calls. Cheap to clone; the
/// underlying reqwest client pools connections per host.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    custom_headers: HashMap<String, String>,
    unary_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        // No global timeout on the client itself: streams must be able
        // to outlive any fixed deadline. Force HTTP/1.1 to avoid
        // HTTP/2 connection resets observed with some providers.
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .http1_only()
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            custom_headers: config.custom_headers.clone(),
            unary_timeout: Duration::from_secs(config.request_timeout_seconds),
        })
    }

    fn build_request(
        &self,
        route: &TierRoute,
        body: &ChatCompletionRequest,
    ) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(chat_url(&route.endpoint)).json(body);

        // Local models run with the conventional "dummy" credential or
        // none at all; neither gets an auth header.
        if let Some(key) = route.api_key.as_deref().filter(|k| *k != "dummy") {
            builder = builder.bearer_auth(key);
        }

        for (name, value) in &self.custom_headers {
            builder = builder.header(name, value);
        }

        builder
    }

    /// One-shot completion call.
    pub async fn chat(
        &self,
        route: &TierRoute,
        body: &ChatCompletionRequest,
    ) -> Result<ChatCompletion, BackendError> {
        let response = self
            .build_request(route, body)
            .timeout(self.unary_timeout)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        response.json().await.map_err(|e| BackendError {
            status: Some(status.as_u16()),
            body: String::new(),
            message: format!("backend sent an unparseable completion: {}", e),
            timed_out: false,
        })
    }

    /// Open a streaming completion call. Returns the raw byte stream;
    /// SSE framing and translation happen downstream.
    pub async fn chat_stream(
        &self,
        route: &TierRoute,
        body: &ChatCompletionRequest,
    ) -> Result<impl Stream<Item = Result<Bytes, BackendError>>, BackendError> {
        let response = self
            .build_request(route, body)
            .send()
            .await
            .map_err(BackendError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::from_status(status.as_u16(), &body));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(BackendError::from_transport)))
    }
}

/// Join a base URL and the completions path without doubling slashes.
fn chat_url(endpoint: &str) -> String {
    format!("{}/chat/completions", endpoint.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_url_joining() {
        assert_eq!(
            chat_url("https://api.openai.com/v1"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            chat_url("http://localhost:11434/v1"),
            "http://localhost:11434/v1/chat/completions"
        );
    }

    #[test]
    fn test_status_error_truncates_body() {
        let long_body = "x".repeat(10_000);
        let err = BackendError::from_status(502, &long_body);
        assert_eq!(err.status, Some(502));
        assert_eq!(err.body.len(), MAX_CAPTURED_BODY_BYTES);
        assert!(!err.timed_out);
    }

    #[test]
    fn test_clip_body_respects_char_boundaries() {
        assert_eq!(clip_body("hello world", 5), "hello");
        assert_eq!(clip_body("short", 100), "short");
        assert_eq!(clip_body("", 5), "");

        // 3-byte characters must not be split mid-sequence
        let s = "モデル不明";
        let clipped = clip_body(s, 7);
        assert_eq!(clipped, "モデ");
        assert!(s.is_char_boundary(clipped.len()));
    }

    #[test]
    fn test_error_display_includes_body() {
        let err = BackendError::from_status(404, r#"{"error":"model not found"}"#);
        let text = err.to_string();
        assert!(text.contains("404"));
        assert!(text.contains("model not found"));
    }
}
