use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chart::ChartSurface;
use crate::error::ChartError;
use crate::market_data::bucketing::{self, TradeOutcome};
use crate::market_data::trade_stream::TradeEvent;
use crate::types::Interval;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// One OHLC bucket.  `bucket_start` is in seconds and is the unique key within
/// a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(rename = "time")]
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(bucket_start: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            bucket_start,
            open,
            high,
            low,
            close,
        }
    }

    /// A candle opened by a single trade.
    pub fn from_price(bucket_start: i64, price: f64) -> Self {
        Self::new(bucket_start, price, price, price, price)
    }

    /// Fold one more trade price into this candle.  `open` never moves.
    pub fn absorb(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Positive finite prices with `low <= open, close <= high`.
    pub fn is_well_formed(&self) -> bool {
        let prices = [self.open, self.high, self.low, self.close];
        prices.iter().all(|p| p.is_finite() && *p > 0.0)
            && self.low <= self.open.min(self.close)
            && self.high >= self.open.max(self.close)
    }
}

// ---------------------------------------------------------------------------
// CandleSeriesStore -- the series for one (symbol, interval) run
// ---------------------------------------------------------------------------

struct StoreInner {
    series: Arc<Vec<Candle>>,
    closed: bool,
}

/// Ordered candle series for a single symbol and interval.
///
/// Readers get an `Arc` of the whole series, so a concurrent `replace` is
/// observed either entirely or not at all.  Live updates are copy-on-write
/// against any snapshot a reader still holds.
///
/// When a chart surface is attached, every accepted mutation is forwarded to
/// it while the write lock is held.  After [`close`](Self::close) all mutators
/// are no-ops, so a torn-down store can never repaint the chart.
pub struct CandleSeriesStore {
    symbol: String,
    interval: Interval,
    inner: RwLock<StoreInner>,
    surface: Option<Arc<dyn ChartSurface>>,
}

impl CandleSeriesStore {
    pub fn new(symbol: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            inner: RwLock::new(StoreInner {
                series: Arc::new(Vec::new()),
                closed: false,
            }),
            surface: None,
        }
    }

    /// Attach the chart surface that mirrors this store.
    pub fn with_surface(mut self, surface: Arc<dyn ChartSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    /// Swap in a whole new series.  Returns `false` if the store is closed.
    ///
    /// The input is normalised first (ordered, one candle per bucket).
    pub fn replace(&self, candles: Vec<Candle>) -> bool {
        let next = Arc::new(bucketing::normalize_snapshot(candles, self.interval));

        let mut inner = self.inner.write();
        if inner.closed {
            debug!(symbol = %self.symbol, interval = %self.interval, "replace on closed store ignored");
            return false;
        }
        inner.series = next;
        if let Some(surface) = &self.surface {
            surface.set_series(&inner.series);
        }
        true
    }

    /// Merge one live trade.
    ///
    /// * `Ok(None)` -- the trade is for another symbol, or the store is closed.
    /// * `Err(InvalidTrade)` -- the price cannot form a candle; nothing changed.
    pub fn apply_trade(&self, event: &TradeEvent) -> Result<Option<TradeOutcome>, ChartError> {
        if event.symbol != self.symbol {
            return Ok(None);
        }

        let mut inner = self.inner.write();
        if inner.closed {
            return Ok(None);
        }

        let series = Arc::make_mut(&mut inner.series);
        let outcome = bucketing::apply_trade(series, event, self.interval)?;

        if let Some(surface) = &self.surface {
            let is_last = series
                .last()
                .map_or(false, |c| c.bucket_start == outcome.candle().bucket_start);
            if is_last {
                surface.update_last(outcome.candle());
            } else {
                surface.set_series(series);
            }
        }
        Ok(Some(outcome))
    }

    /// Current series, oldest first.
    pub fn snapshot(&self) -> Arc<Vec<Candle>> {
        Arc::clone(&self.inner.read().series)
    }

    /// The newest candle, if any.
    pub fn last(&self) -> Option<Candle> {
        self.inner.read().series.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ask the attached surface to fit its view to the data.
    pub fn fit_view(&self) {
        let inner = self.inner.read();
        if inner.closed {
            return;
        }
        if let Some(surface) = &self.surface {
            surface.fit_view();
        }
    }

    /// Terminal: refuse every later mutation.  Idempotent.
    pub fn close(&self) {
        self.inner.write().closed = true;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::testing::{RecordingSurface, SurfaceCall};

    fn trade(symbol: &str, price: f64, at_secs: i64) -> TradeEvent {
        TradeEvent {
            price,
            occurred_at_millis: at_secs * 1000,
            symbol: symbol.into(),
        }
    }

    fn candle(t: i64, close: f64) -> Candle {
        Candle::new(t, close, close * 1.1, close * 0.9, close)
    }

    #[test]
    fn well_formed_checks_ohlc_bounds() {
        assert!(candle(0, 10.0).is_well_formed());
        assert!(!Candle::new(0, 10.0, 9.0, 8.0, 9.5).is_well_formed());
        assert!(!Candle::new(0, 10.0, 11.0, 10.5, 10.0).is_well_formed());
        assert!(!Candle::new(0, 0.0, 0.0, 0.0, 0.0).is_well_formed());
    }

    #[test]
    fn candle_serialises_time_key() {
        let json = serde_json::to_value(Candle::from_price(60, 2.0)).unwrap();
        assert_eq!(json["time"], 60);
        assert_eq!(json["close"], 2.0);
    }

    #[test]
    fn replace_swaps_whole_series() {
        let store = CandleSeriesStore::new("BTC_USDT", Interval::OneMinute);
        assert!(store.replace(vec![candle(0, 1.0), candle(60, 2.0)]));
        let old = store.snapshot();

        assert!(store.replace(vec![candle(120, 9.0)]));
        let new = store.snapshot();

        // A reader holding the earlier snapshot keeps seeing the whole of it.
        assert_eq!(old.len(), 2);
        assert_eq!(old[1].close, 2.0);
        assert_eq!(new.as_slice(), &[candle(120, 9.0)]);
    }

    #[test]
    fn readers_never_see_a_mixed_series() {
        let store = Arc::new(CandleSeriesStore::new("BTC_USDT", Interval::OneMinute));
        let pull_a: Vec<Candle> = (0..50).map(|i| candle(i * 60, 1.0)).collect();
        let pull_b: Vec<Candle> = (0..50).map(|i| candle(i * 60, 2.0)).collect();
        assert!(store.replace(pull_a.clone()));

        let writer = {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..500 {
                    if i % 2 == 0 {
                        store.replace(pull_b.clone());
                    } else {
                        store.replace(pull_a.clone());
                    }
                }
            })
        };

        for _ in 0..500 {
            let snap = store.snapshot();
            assert_eq!(snap.len(), 50);
            let first = snap[0].close;
            assert!(snap.iter().all(|c| c.close == first), "mixed pulls observed");
        }
        writer.join().unwrap();
    }

    #[test]
    fn apply_trade_is_copy_on_write() {
        let store = CandleSeriesStore::new("BTC_USDT", Interval::OneMinute);
        store.replace(vec![candle(0, 10.0)]);
        let before = store.snapshot();

        store.apply_trade(&trade("BTC_USDT", 20.0, 30)).unwrap();

        assert_eq!(before[0].close, 10.0);
        assert_eq!(store.last().unwrap().close, 20.0);
        assert_eq!(store.last().unwrap().high, 20.0);
    }

    #[test]
    fn other_symbol_is_ignored() {
        let store = CandleSeriesStore::new("BTC_USDT", Interval::OneMinute);
        let out = store.apply_trade(&trade("ETH_USDT", 20.0, 30)).unwrap();
        assert!(out.is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn closed_store_ignores_mutations() {
        let surface = Arc::new(RecordingSurface::default());
        let store = CandleSeriesStore::new("BTC_USDT", Interval::OneMinute)
            .with_surface(surface.clone());
        store.replace(vec![candle(0, 1.0)]);
        store.close();

        assert!(!store.replace(vec![candle(60, 2.0)]));
        assert!(store.apply_trade(&trade("BTC_USDT", 5.0, 61)).unwrap().is_none());
        store.fit_view();

        assert_eq!(store.snapshot().as_slice(), &[candle(0, 1.0)]);
        assert_eq!(surface.calls().len(), 1);
    }

    #[test]
    fn surface_mirrors_mutations() {
        let surface = Arc::new(RecordingSurface::default());
        let store = CandleSeriesStore::new("BTC_USDT", Interval::OneMinute)
            .with_surface(surface.clone());

        store.replace(vec![candle(60, 1.0)]);
        store.apply_trade(&trade("BTC_USDT", 3.0, 70)).unwrap();
        // Older bucket: the whole series is re-sent.
        store.apply_trade(&trade("BTC_USDT", 4.0, 5)).unwrap();

        let calls = surface.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(&calls[0], SurfaceCall::SetSeries(s) if s.len() == 1));
        assert!(matches!(&calls[1], SurfaceCall::UpdateLast(c) if c.close == 3.0));
        assert!(matches!(&calls[2], SurfaceCall::SetSeries(s) if s.len() == 2));
    }
}
