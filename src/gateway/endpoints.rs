//! Auxiliary HTTP endpoints: model listing, health, token counting
//!
//! `/v1/messages/count_tokens` is answered synthetically: Claude Code
//! calls it aggressively at startup, and OpenAI-style backends have no
//! equivalent endpoint to forward it to.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde_json::json;

use crate::config::Tier;
use crate::gateway::{check_auth, error::GatewayError, GatewayContext};
use crate::protocol::anthropic::MessagesRequest;
use crate::tokens::estimate_request_tokens;

/// Anthropic pseudo-names always advertised alongside the configured
/// backend ids, so pointing Claude Code at the gateway works without
/// the client knowing any backend model names.
const PSEUDO_MODELS: &[&str] = &["claude-opus-4", "claude-sonnet-4", "claude-haiku-4"];

pub async fn list_models(State(ctx): State<GatewayContext>) -> Response {
    let created = Utc::now().timestamp();

    let mut ids: Vec<String> = Vec::new();
    for tier in Tier::ALL {
        let model_id = &ctx.router.tier_route(tier).model_id;
        if !ids.contains(model_id) {
            ids.push(model_id.clone());
        }
    }
    ids.extend(PSEUDO_MODELS.iter().map(|s| s.to_string()));

    let data: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": owner_of(id),
                "created": created,
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data })).into_response()
}

/// Provider prefix when the id carries one (`openai/gpt-5` → `openai`).
fn owner_of(model_id: &str) -> &str {
    match model_id.split_once('/') {
        Some((owner, _)) => owner,
        None if model_id.starts_with("claude") => "anthropic",
        None => "crosswire",
    }
}

pub async fn health(State(ctx): State<GatewayContext>) -> Response {
    let reasoning = Tier::ALL
        .iter()
        .any(|&tier| !ctx.router.tier_route(tier).reasoning.is_off());

    let mut body = json!({
        "status": "healthy",
        "version": crate::config::VERSION,
        "provider": {
            "base_url": ctx.config.provider_base_url,
            "model_mapping": {
                "big": ctx.router.tier_route(Tier::Big).model_id,
                "middle": ctx.router.tier_route(Tier::Middle).model_id,
                "small": ctx.router.tier_route(Tier::Small).model_id,
            },
        },
        "features": {
            "streaming": true,
            "reasoning": reasoning,
        },
    });

    if let Some(meter) = &ctx.meter {
        let metrics = meter.metrics();
        body["usage"] = json!({
            "enabled": true,
            "rows_stored": metrics.rows_stored,
            "rows_dropped": metrics.rows_dropped,
            "rows_failed": metrics.rows_failed,
            "avg_write_latency_us": metrics.avg_write_latency_us,
        });
    }

    Json(body).into_response()
}

pub async fn count_tokens(
    State(ctx): State<GatewayContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = check_auth(&ctx, &headers) {
        return e.into_response();
    }

    let req: Result<MessagesRequest, _> = serde_json::from_slice(&body);
    match req {
        Ok(req) => {
            let input_tokens = estimate_request_tokens(&req);
            Json(json!({ "input_tokens": input_tokens })).into_response()
        }
        Err(e) => GatewayError::InvalidRequest(format!("malformed request body: {}", e))
            .into_response(),
    }
}
