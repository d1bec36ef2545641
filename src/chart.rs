// =============================================================================
// Chart Surface - narrow capability interface towards the display
// =============================================================================
//
// The aggregation core only ever talks to a chart through three calls.  Any
// concrete renderer is an adapter behind `ChartSurface`; the one shipped here
// (`ChartFeed`) republishes the calls to dashboard WebSocket clients.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::market_data::Candle;

/// Capacity of the update channel; a client lagging further is resynced.
const CHANNEL_CAPACITY: usize = 256;

/// What the sync core needs from a chart.
pub trait ChartSurface: Send + Sync {
    /// Show exactly `candles`, replacing whatever was drawn.
    fn set_series(&self, candles: &[Candle]);
    /// Update (or append) the newest candle.
    fn update_last(&self, candle: &Candle);
    /// Fit the visible range to the data.
    fn fit_view(&self);
}

/// One surface call, as pushed to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ChartUpdate {
    #[serde(rename = "SERIES_RESET")]
    Reset { candles: Vec<Candle> },
    #[serde(rename = "CANDLE_UPDATE")]
    Last { candle: Candle },
    #[serde(rename = "FIT_VIEW")]
    Fit,
}

/// Broadcasting chart surface.
///
/// Every call bumps `version` and is fanned out to all subscribers.
pub struct ChartFeed {
    tx: broadcast::Sender<ChartUpdate>,
    version: AtomicU64,
}

impl ChartFeed {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            version: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChartUpdate> {
        self.tx.subscribe()
    }

    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    fn publish(&self, update: ChartUpdate) {
        self.version.fetch_add(1, Ordering::Relaxed);
        // No subscribers is fine: the REST snapshot stays authoritative.
        let _ = self.tx.send(update);
    }
}

impl Default for ChartFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartSurface for ChartFeed {
    fn set_series(&self, candles: &[Candle]) {
        self.publish(ChartUpdate::Reset {
            candles: candles.to_vec(),
        });
    }

    fn update_last(&self, candle: &Candle) {
        self.publish(ChartUpdate::Last {
            candle: candle.clone(),
        });
    }

    fn fit_view(&self) {
        self.publish(ChartUpdate::Fit);
    }
}
