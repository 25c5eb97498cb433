//! HTTP gateway
//!
//! Binds the translation pipeline to the Anthropic-side HTTP surface:
//! `/v1/messages` (unary + streaming), `/v1/messages/count_tokens`,
//! `/v1/models`, and `/health`.
//!
//! All shared state lives in `GatewayContext`, constructed once at
//! startup and cloned into handlers. `Config` is immutable behind an
//! `Arc`; a future reload would swap the Arc.

pub mod endpoints;
pub mod error;
pub mod messages;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    http::HeaderMap,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;

use crate::backend::BackendClient;
use crate::config::Config;
use crate::router::ModelRouter;
use crate::usage::UsageMeter;

use error::GatewayError;

/// Shared state for all request handlers.
#[derive(Clone)]
pub struct GatewayContext {
    pub config: Arc<Config>,
    pub router: Arc<ModelRouter>,
    pub backend: BackendClient,
    pub meter: Option<UsageMeter>,
    /// Set when shutdown begins; new requests are refused while
    /// in-flight ones drain.
    pub draining: Arc<AtomicBool>,
}

impl GatewayContext {
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }
}

/// Enforce proxy auth when configured: clients present the key either
/// as `x-api-key` or as a bearer token. Empty config disables auth.
pub fn check_auth(ctx: &GatewayContext, headers: &HeaderMap) -> Result<(), GatewayError> {
    let Some(expected) = ctx.config.proxy_auth_key.as_deref() else {
        return Ok(());
    };

    let presented = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        });

    match presented {
        Some(key) if key == expected => Ok(()),
        _ => Err(GatewayError::invalid_api_key()),
    }
}

/// Start the gateway server
pub async fn start_gateway(
    config: Config,
    meter: Option<UsageMeter>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    let bind_addr = config.bind_addr;
    let shutdown_timeout = Duration::from_secs(config.shutdown_timeout_seconds);

    let backend = BackendClient::new(&config)?;
    let model_router = Arc::new(ModelRouter::from_config(&config));
    let draining = Arc::new(AtomicBool::new(false));

    let ctx = GatewayContext {
        config: Arc::new(config),
        router: model_router,
        backend,
        meter,
        draining: draining.clone(),
    };

    let app = Router::new()
        .route("/v1/messages", post(messages::post_messages))
        .route(
            "/v1/messages/count_tokens",
            post(endpoints::count_tokens),
        )
        .route("/v1/models", get(endpoints::list_models))
        .route("/health", get(endpoints::health))
        .with_state(ctx);

    let listener = TcpListener::bind(bind_addr)
        .await
        .context("Failed to bind to address")?;

    tracing::info!("Gateway listening on {}", bind_addr);

    // Graceful shutdown: flip the draining flag so new requests get
    // 503, let axum drain in-flight ones, and force-close if the drain
    // window elapses first.
    let (drain_tx, drain_rx) = tokio::sync::oneshot::channel::<()>();
    let graceful = async move {
        shutdown_rx.await.ok();
        draining.store(true, Ordering::SeqCst);
        tracing::info!("Shutdown requested; draining in-flight requests");
        let _ = drain_tx.send(());
    };

    let force_close = async move {
        drain_rx.await.ok();
        tokio::time::sleep(shutdown_timeout).await;
    };

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(graceful) => {
            result.context("Server error")?;
            tracing::info!("Gateway shut down gracefully");
        }
        _ = force_close => {
            tracing::warn!(
                "Drain window of {}s elapsed; force-closing remaining connections",
                shutdown_timeout.as_secs()
            );
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn ctx_with_auth(key: Option<&str>) -> GatewayContext {
        let mut config = Config::default();
        config.proxy_auth_key = key.map(String::from);
        config.provider_api_key = Some("sk-test".to_string());
        let router = Arc::new(ModelRouter::from_config(&config));
        let backend = BackendClient::new(&config).unwrap();
        GatewayContext {
            config: Arc::new(config),
            router,
            backend,
            meter: None,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    #[test]
    fn test_auth_disabled_when_unset() {
        let ctx = ctx_with_auth(None);
        assert!(check_auth(&ctx, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn test_auth_accepts_x_api_key() {
        let ctx = ctx_with_auth(Some("sekrit"));
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("sekrit"));
        assert!(check_auth(&ctx, &headers).is_ok());
    }

    #[test]
    fn test_auth_accepts_bearer() {
        let ctx = ctx_with_auth(Some("sekrit"));
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer sekrit"));
        assert!(check_auth(&ctx, &headers).is_ok());
    }

    #[test]
    fn test_auth_rejects_mismatch_and_absence() {
        let ctx = ctx_with_auth(Some("sekrit"));

        let mut wrong = HeaderMap::new();
        wrong.insert("x-api-key", HeaderValue::from_static("nope"));
        assert!(check_auth(&ctx, &wrong).is_err());

        assert!(check_auth(&ctx, &HeaderMap::new()).is_err());

        let mut basic = HeaderMap::new();
        basic.insert("authorization", HeaderValue::from_static("Basic sekrit"));
        assert!(check_auth(&ctx, &basic).is_err());
    }
}
