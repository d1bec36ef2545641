// =============================================================================
// Central Application State - Aurora Chart Engine
// =============================================================================
//
// Ties the chart session to its display bridge for the HTTP/WebSocket API.
// There is exactly one `AppState` per process, created in `main` and passed to
// handlers as `Arc<AppState>`; nothing here is a global.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::chart::ChartFeed;
use crate::exchange::HistorySource;
use crate::market_data::{Candle, LiveEventSource};
use crate::runtime_config::RuntimeConfig;
use crate::sync::ChartSession;
use crate::types::{ConnectionState, Interval, SyncPhase};

/// Full chart state as served to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ChartSnapshot {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub symbol: String,
    pub interval: Option<Interval>,
    pub phase: SyncPhase,
    pub connection: ConnectionState,
    pub version: u64,
    pub candles: Vec<Candle>,
}

/// Application state shared across all handlers via `Arc<AppState>`.
pub struct AppState {
    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: RwLock<RuntimeConfig>,

    // ── Chart ───────────────────────────────────────────────────────────
    pub session: Arc<ChartSession>,
    pub feed: Arc<ChartFeed>,

    // ── Timing ──────────────────────────────────────────────────────────
    /// Instant when the engine was started. Used for uptime calculations.
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire a chart session to a fresh broadcast feed.
    ///
    /// The session is not started; call `session.set_interval(..)` from within
    /// the runtime.
    pub fn new(
        config: RuntimeConfig,
        history: Arc<dyn HistorySource>,
        live: Arc<dyn LiveEventSource>,
    ) -> Self {
        let feed = Arc::new(ChartFeed::new());
        let session = ChartSession::new(config.sync_settings(), history, live)
            .with_surface(feed.clone());

        Self {
            runtime_config: RwLock::new(config),
            session: Arc::new(session),
            feed,
            start_time: std::time::Instant::now(),
        }
    }

    pub fn current_state_version(&self) -> u64 {
        self.feed.current_version()
    }

    /// Build the full chart snapshot for REST and for WebSocket (re)syncs.
    pub fn build_snapshot(&self) -> ChartSnapshot {
        // Version first: a client seeing this version has at least this data.
        let version = self.feed.current_version();
        let status = self.session.status();
        let candles = self.session.current_series();

        ChartSnapshot {
            kind: "SERIES_SNAPSHOT",
            symbol: status.symbol,
            interval: status.interval,
            phase: status.phase,
            connection: status.connection,
            version,
            candles: candles.as_ref().clone(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
