//! The `/v1/messages` handler
//!
//! One handler, two shapes: unary requests get a translated JSON
//! response; `stream: true` requests get an Anthropic SSE stream fed by
//! the backend's Chat Completions stream through `StreamTranslator`.
//!
//! Streaming error rules: anything that fails before the backend
//! stream opens becomes a normal HTTP error response; anything after
//! the first bytes are on the wire becomes a final in-stream `error`
//! event at HTTP 200.

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use futures::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::gateway::{check_auth, error::GatewayError, GatewayContext};
use crate::protocol::anthropic::MessagesRequest;
use crate::protocol::openai::ChatCompletion;
use crate::router::TierRoute;
use crate::transform::request::transform_request;
use crate::transform::response::transform_completion;
use crate::transform::stream::StreamTranslator;
use crate::usage::{json_scan, RequestStats, UsageMeter, UsageRecord};

pub async fn post_messages(
    State(ctx): State<GatewayContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    match handle_messages(ctx, headers, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn handle_messages(
    ctx: GatewayContext,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    check_auth(&ctx, &headers)?;

    if ctx.is_draining() {
        return Err(GatewayError::Overloaded(
            "gateway is shutting down".to_string(),
        ));
    }

    let req: MessagesRequest = serde_json::from_slice(&body)
        .map_err(|e| GatewayError::InvalidRequest(format!("malformed request body: {}", e)))?;

    if req.messages.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "messages must not be empty".to_string(),
        ));
    }

    let route = ctx.router.resolve(&req.model)?;
    let (backend_req, policy) = transform_request(&req, &route, &ctx.config)?;

    let recorder = Recorder::new(&ctx, &req, &route);

    if req.stream {
        handle_streaming(ctx, req, route, backend_req, policy, recorder).await
    } else {
        handle_unary(ctx, req, route, backend_req, policy, recorder).await
    }
}

async fn handle_unary(
    ctx: GatewayContext,
    req: MessagesRequest,
    route: TierRoute,
    backend_req: crate::protocol::openai::ChatCompletionRequest,
    policy: crate::config::ReasoningPolicy,
    recorder: Recorder,
) -> Result<Response, GatewayError> {
    match ctx.backend.chat(&route, &backend_req).await {
        Ok(completion) => {
            let response = transform_completion(&completion, &req.model, &policy);
            recorder.finish_unary(&completion, "ok", None);
            Ok(Json(response).into_response())
        }
        Err(e) => {
            let error = GatewayError::from_backend(e, &route.model_id);
            recorder.finish_failed(error.error_type());
            Err(error)
        }
    }
}

async fn handle_streaming(
    ctx: GatewayContext,
    req: MessagesRequest,
    route: TierRoute,
    backend_req: crate::protocol::openai::ChatCompletionRequest,
    policy: crate::config::ReasoningPolicy,
    recorder: Recorder,
) -> Result<Response, GatewayError> {
    let backend_stream = match ctx.backend.chat_stream(&route, &backend_req).await {
        Ok(stream) => stream,
        Err(e) => {
            let error = GatewayError::from_backend(e, &route.model_id);
            recorder.finish_failed(error.error_type());
            return Err(error);
        }
    };

    let idle_timeout = Duration::from_secs(ctx.config.stream_idle_timeout_seconds);
    let routed_model = route.model_id.clone();
    let mut translator = StreamTranslator::new(req.model.clone(), policy);

    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, Infallible>>(32);

    tokio::spawn(async move {
        let mut backend_stream = Box::pin(backend_stream);

        loop {
            match tokio::time::timeout(idle_timeout, backend_stream.next()).await {
                // Idle timeout between chunks: surface in-stream if
                // anything was sent, then stop reading.
                Err(_) => {
                    let error =
                        GatewayError::Timeout("backend stream went idle".to_string());
                    let _ = tx.send(Ok(Bytes::from(error.to_sse_events()))).await;
                    recorder.finish_stream(&translator, "error", Some("timeout"));
                    break;
                }
                // Backend EOF: emit whatever termination events are
                // still owed (no-op when [DONE] already closed us).
                Ok(None) => {
                    let out = translator.finish();
                    if !out.is_empty() {
                        let _ = tx.send(Ok(Bytes::from(out))).await;
                    }
                    recorder.finish_stream(&translator, "ok", None);
                    break;
                }
                Ok(Some(Ok(chunk))) => {
                    let out = translator.push_bytes(&chunk);
                    if !out.is_empty() && tx.send(Ok(Bytes::from(out))).await.is_err() {
                        // Client went away; closing the backend stream
                        // happens by dropping it.
                        recorder.finish_stream(&translator, "ok", Some("client_cancel"));
                        break;
                    }
                    if translator.is_done() {
                        recorder.finish_stream(&translator, "ok", None);
                        break;
                    }
                }
                Ok(Some(Err(e))) => {
                    // The HTTP 200 is already on the wire; transport
                    // failures from here on become in-stream events.
                    let error = GatewayError::from_backend(e, &routed_model);
                    let _ = tx.send(Ok(Bytes::from(error.to_sse_events()))).await;
                    recorder.finish_stream(&translator, "error", Some(error.error_type()));
                    break;
                }
            }
        }
    });

    // Streams are HTTP 200 regardless of what happens later.
    let body = Body::from_stream(ReceiverStream::new(rx));
    Response::builder()
        .status(200)
        .header("content-type", "text/event-stream")
        .header("cache-control", "no-cache")
        .header("connection", "keep-alive")
        .body(body)
        .map_err(|e| GatewayError::Backend(format!("failed to build response: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Usage recording
// ─────────────────────────────────────────────────────────────────────────────

/// Collects everything known about a request up front, then fills in
/// outcome fields exactly once at completion. Also owns the one
/// request-complete log line.
struct Recorder {
    meter: Option<UsageMeter>,
    request_id: String,
    started: Instant,
    model_requested: String,
    model_routed: String,
    endpoint: String,
    tier: String,
    stream: bool,
    stats: RequestStats,
}

impl Recorder {
    fn new(ctx: &GatewayContext, req: &MessagesRequest, route: &TierRoute) -> Self {
        Self {
            meter: ctx.meter.clone(),
            request_id: generate_request_id(),
            started: Instant::now(),
            model_requested: req.model.clone(),
            model_routed: route.model_id.clone(),
            endpoint: route.endpoint.clone(),
            tier: route.tier.as_str().to_string(),
            stream: req.stream,
            stats: RequestStats::from_request(req),
        }
    }

    fn finish_unary(self, completion: &ChatCompletion, status: &str, error_message: Option<&str>) {
        let usage = completion.usage.unwrap_or_default();

        let thinking_text_estimate = completion
            .choices
            .first()
            .and_then(|c| c.message.reasoning.as_deref())
            .map(|r| (r.chars().count() as u64) / 4)
            .unwrap_or(0);
        let thinking_tokens = usage.reasoning_tokens().unwrap_or(thinking_text_estimate);

        let output_text = completion
            .choices
            .first()
            .map(|c| {
                let mut text = c.message.content.clone().unwrap_or_default();
                if let Some(tool_calls) = &c.message.tool_calls {
                    for tc in tool_calls {
                        text.push_str(&tc.function.arguments);
                    }
                }
                text
            })
            .unwrap_or_default();

        self.write(
            usage.prompt_tokens,
            usage.completion_tokens,
            thinking_tokens,
            &output_text,
            status,
            error_message,
        );
    }

    fn finish_stream(&self, translator: &StreamTranslator, status: &str, error_message: Option<&str>) {
        let totals = translator.usage_totals();
        self.write(
            totals.input_tokens,
            totals.output_tokens,
            totals.thinking_tokens,
            translator.collected_output(),
            status,
            error_message,
        );
    }

    fn finish_failed(self, error_type: &str) {
        self.write(0, 0, 0, "", "error", Some(error_type));
    }

    fn write(
        &self,
        input_tokens: u64,
        output_tokens: u64,
        thinking_tokens: u64,
        output_text: &str,
        status: &str,
        error_message: Option<&str>,
    ) {
        let duration_ms = self.started.elapsed().as_millis() as u64;

        tracing::info!(
            request_id = %self.request_id,
            tier = %self.tier,
            model_routed = %self.model_routed,
            status = %status,
            duration_ms = duration_ms,
            input_tokens = input_tokens,
            output_tokens = output_tokens,
            "request complete"
        );

        let Some(meter) = &self.meter else {
            return;
        };

        let json = self.stats.json.merge(json_scan::scan_text(output_text));

        meter.log(UsageRecord {
            request_id: self.request_id.clone(),
            ts: Utc::now(),
            model_requested: self.model_requested.clone(),
            model_routed: self.model_routed.clone(),
            endpoint: self.endpoint.clone(),
            tier: self.tier.clone(),
            input_tokens,
            output_tokens,
            thinking_tokens,
            duration_ms,
            stream: self.stream,
            message_count: self.stats.message_count,
            has_system: self.stats.has_system,
            has_tools: self.stats.has_tools,
            has_images: self.stats.has_images,
            status: status.to_string(),
            error_message: error_message.map(String::from),
            has_json_content: json.has_json,
            json_bytes: json.json_bytes,
        });
    }
}

/// Generate a unique request id for log correlation.
fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);

    format!("req_{:x}", timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert!(id.starts_with("req_"));
        assert!(id.len() > 8);
    }
}
