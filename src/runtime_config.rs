// =============================================================================
// Runtime Configuration - chart engine settings with atomic save
// =============================================================================
//
// Every tunable lives here.  All fields carry `#[serde(default)]` so that
// adding new fields never breaks loading an older config file.  Environment
// variables (optionally from `.env`) override whatever the file says.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::sync::SyncSettings;
use crate::types::Interval;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_api_url() -> String {
    "http://localhost:8010".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8010".to_string()
}

fn default_symbol() -> String {
    "BTC_USDT".to_string()
}

fn default_snapshot_limit() -> usize {
    100
}

fn default_refresh_period_ms() -> u64 {
    1_000
}

fn default_retry_period_ms() -> u64 {
    5_000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3002".to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the chart engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Upstream exchange ---------------------------------------------------

    /// Base URL of the exchange REST API (candle history).
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Base URL of the exchange WebSocket (live trades); `/ws` is appended.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    // --- Chart --------------------------------------------------------------

    /// The single market this engine charts.
    #[serde(default = "default_symbol")]
    pub symbol: String,

    /// Interval shown at startup.
    #[serde(default)]
    pub default_interval: Interval,

    /// Candles requested per snapshot pull.
    #[serde(default = "default_snapshot_limit")]
    pub snapshot_limit: usize,

    /// Delay between snapshot refreshes while live (milliseconds).
    #[serde(default = "default_refresh_period_ms")]
    pub refresh_period_ms: u64,

    /// Delay between attempts while degraded (milliseconds).
    #[serde(default = "default_retry_period_ms")]
    pub retry_period_ms: u64,

    // --- Dashboard ----------------------------------------------------------

    /// Address the dashboard API binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            symbol: default_symbol(),
            default_interval: Interval::default(),
            snapshot_limit: default_snapshot_limit(),
            refresh_period_ms: default_refresh_period_ms(),
            retry_period_ms: default_retry_period_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbol = %config.symbol,
            interval = %config.default_interval,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Apply `CHART_*` overrides from a variable lookup (normally
    /// `std::env::var`).  Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CHART_API_URL") {
            self.api_url = v;
        }
        if let Some(v) = lookup("CHART_WS_URL") {
            self.ws_url = v;
        }
        if let Some(v) = lookup("CHART_SYMBOL") {
            let v = v.trim().to_uppercase();
            if !v.is_empty() {
                self.symbol = v;
            }
        }
        if let Some(v) = lookup("CHART_INTERVAL") {
            match v.parse::<Interval>() {
                Ok(iv) => self.default_interval = iv,
                Err(e) => warn!(value = %v, error = %e, "ignoring CHART_INTERVAL"),
            }
        }
        if let Some(v) = lookup("CHART_BIND_ADDR") {
            self.bind_addr = v;
        }
    }

    /// Settings handed to every sync orchestrator.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            symbol: self.symbol.clone(),
            snapshot_limit: self.snapshot_limit.max(1),
            refresh_period: Duration::from_millis(self.refresh_period_ms.max(1)),
            retry_period: Duration::from_millis(self.retry_period_ms.max(1)),
        }
    }
}
