// =============================================================================
// Aurora Chart Engine - Main Entry Point
// =============================================================================
//
// Pulls candle history for one market, folds the live trade stream into the
// newest candle, and serves the result to the dashboard over HTTP/WebSocket.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod chart;
mod error;
mod exchange;
mod market_data;
mod runtime_config;
mod sync;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::exchange::HttpHistorySource;
use crate::market_data::WsLiveEventSource;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "chart_config.json";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Aurora Chart Engine - starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_overrides(|key| std::env::var(key).ok());

    info!(
        symbol = %config.symbol,
        interval = %config.default_interval,
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        "configuration resolved"
    );

    // ── 2. Upstream sources ──────────────────────────────────────────────
    let history = Arc::new(
        HttpHistorySource::new(&config.api_url).context("failed to build history client")?,
    );
    let live = Arc::new(WsLiveEventSource::new(&config.ws_url));

    // ── 3. Chart session ─────────────────────────────────────────────────
    let initial_interval = config.default_interval;
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, history, live));
    state.session.set_interval(initial_interval);

    // ── 4. Start the API server ──────────────────────────────────────────
    let api_state = state.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "Failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("Chart engine running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received - stopping gracefully");

    let last_interval = state.session.active_interval();
    state.session.shutdown();

    {
        let mut cfg = state.runtime_config.write();
        if let Some(interval) = last_interval {
            cfg.default_interval = interval;
        }
        if let Err(e) = cfg.save(CONFIG_PATH) {
            error!(error = %e, "Failed to save runtime config on shutdown");
        }
    }

    info!("Aurora Chart Engine shut down complete.");
    Ok(())
}
