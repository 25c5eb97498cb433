// crosswire - Translating LLM gateway
//
// Exposes the Anthropic Messages API on one side and forwards every
// call to an OpenAI-compatible backend on the other, rewriting requests
// and streaming responses on the fly. Clients built for Claude (notably
// the Claude Code CLI) can use any OpenAI-style provider unmodified.
//
// Architecture:
// - Gateway (axum): /v1/messages, /v1/models, /health
// - ModelRouter: opus/sonnet/haiku -> configured backend tiers
// - Transform: request/response/stream translation between dialects
// - BackendClient (reqwest): unary + SSE calls to the provider
// - UsageMeter: per-request analytics rows in SQLite

mod backend;
mod cli;
mod config;
mod gateway;
mod pricing;
mod protocol;
mod router;
mod tokens;
mod transform;
mod usage;

use anyhow::Result;
use config::{Config, Tier};
use router::ModelRouter;
use sha2::{Digest, Sha256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use usage::UsageMeter;

#[tokio::main]
async fn main() -> Result<()> {
    // Handle CLI subcommands first (config/usage); exit early if one ran
    if cli::handle_cli() {
        return Ok(());
    }

    // Ensure config template exists (helps users discover options)
    Config::ensure_config_exists();

    let config = Config::from_env();

    // Initialize tracing. Precedence: RUST_LOG env var > config level.
    // File logging is opt-in and rotates per config.
    let default_filter = format!("crosswire={},tower_http=warn", config.logging.level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    // The rolling-file guard must outlive the subscriber; hold it for
    // the lifetime of main.
    let _file_guard = if config.logging.file_enabled {
        let appender = match config.logging.file_rotation {
            config::LogRotation::Hourly => tracing_appender::rolling::hourly(
                &config.logging.file_dir,
                &config.logging.file_prefix,
            ),
            config::LogRotation::Daily => tracing_appender::rolling::daily(
                &config.logging.file_dir,
                &config.logging.file_prefix,
            ),
            config::LogRotation::Never => tracing_appender::rolling::never(
                &config.logging.file_dir,
                format!("{}.log", config.logging.file_prefix),
            ),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer))
            .init();
        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        None
    };

    log_startup(&config);

    // Usage meter: dedicated writer thread behind a bounded queue
    let meter = if config.track_usage {
        match UsageMeter::new(&config.usage_db_path) {
            Ok(meter) => Some(meter),
            Err(e) => {
                tracing::warn!("Usage tracking disabled, meter failed to start: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Shutdown on SIGINT/SIGTERM via a oneshot into the server
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    let result = gateway::start_gateway(config, meter.clone(), shutdown_rx).await;

    // Flush any queued usage rows before exit
    if let Some(meter) = meter {
        meter.shutdown();
    }

    result
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// One startup block naming the listen address and each tier's route.
/// Credentials are shown as present/absent only; the proxy auth key is
/// logged as a short fingerprint so operators can tell deployments
/// apart without the key itself ever reaching a log file.
fn log_startup(config: &Config) {
    tracing::info!("crosswire v{}", config::VERSION);
    tracing::info!("Listening on {}", config.bind_addr);
    tracing::info!("Provider: {}", config.provider_base_url);

    let router = ModelRouter::from_config(config);
    for tier in Tier::ALL {
        let route = router.tier_route(tier);
        tracing::info!(
            "  {:>6}: {} @ {} (key {}, reasoning {})",
            tier.as_str(),
            route.model_id,
            route.endpoint,
            if route.api_key.is_some() {
                "set"
            } else {
                "missing"
            },
            route.reasoning.describe(),
        );
    }

    match &config.proxy_auth_key {
        Some(key) => {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            let hash = hasher.finalize();
            let fingerprint = format!("{:x}", hash);
            tracing::info!("Client auth enabled (key fingerprint {})", &fingerprint[..12]);
        }
        None => tracing::info!("Client auth disabled"),
    }

    if config.track_usage {
        tracing::info!("Usage tracking: {}", config.usage_db_path.display());
    } else {
        tracing::info!("Usage tracking disabled");
    }
}
