// =============================================================================
// Trade bucketing - maps trades onto fixed-width OHLC candles
// =============================================================================
//
// Everything in here is pure: no locks, no logging side channels beyond the
// snapshot normaliser's warnings, no clock.  The store and orchestrator build
// their policies (symbol filtering, staleness) on top.
// =============================================================================

use tracing::warn;

use crate::error::ChartError;
use crate::market_data::candle_series::Candle;
use crate::market_data::trade_stream::TradeEvent;
use crate::types::Interval;

/// What `apply_trade` did to the series.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeOutcome {
    /// An existing candle absorbed the trade.
    Updated(Candle),
    /// The trade opened a new bucket.
    Inserted(Candle),
}

impl TradeOutcome {
    pub fn candle(&self) -> &Candle {
        match self {
            Self::Updated(c) | Self::Inserted(c) => c,
        }
    }
}

/// Start (in seconds) of the bucket containing `occurred_at_millis`.
///
/// Floor division throughout, so pre-epoch timestamps still land in the bucket
/// that contains them.
pub fn bucket_start(occurred_at_millis: i64, interval_seconds: i64) -> i64 {
    let width_ms = interval_seconds * 1_000;
    occurred_at_millis.div_euclid(width_ms) * interval_seconds
}

/// Bucket of a trade event for the given interval.
pub fn bucket_of(event: &TradeEvent, interval: Interval) -> i64 {
    bucket_start(event.occurred_at_millis, interval.seconds())
}

/// Reject prices that cannot form a valid candle.
pub fn validate_price(price: f64) -> Result<(), ChartError> {
    if !price.is_finite() || price <= 0.0 {
        return Err(ChartError::InvalidTrade(format!(
            "price must be finite and positive, got {price}"
        )));
    }
    Ok(())
}

/// Merge a single trade into `series`.
///
/// Only the trade's own bucket is touched; nothing is ever removed.  The
/// series stays ordered by `bucket_start`.
pub fn apply_trade(
    series: &mut Vec<Candle>,
    event: &TradeEvent,
    interval: Interval,
) -> Result<TradeOutcome, ChartError> {
    validate_price(event.price)?;
    let bucket = bucket_of(event, interval);

    // Fast path: the trade belongs to the newest candle or opens a new one.
    match series.last().map(|c| c.bucket_start) {
        Some(last) if last == bucket => {
            let idx = series.len() - 1;
            series[idx].absorb(event.price);
            return Ok(TradeOutcome::Updated(series[idx].clone()));
        }
        Some(last) if last > bucket => {}
        _ => {
            let candle = Candle::from_price(bucket, event.price);
            series.push(candle.clone());
            return Ok(TradeOutcome::Inserted(candle));
        }
    }

    match series.binary_search_by_key(&bucket, |c| c.bucket_start) {
        Ok(idx) => {
            series[idx].absorb(event.price);
            Ok(TradeOutcome::Updated(series[idx].clone()))
        }
        Err(idx) => {
            let candle = Candle::from_price(bucket, event.price);
            series.insert(idx, candle.clone());
            Ok(TradeOutcome::Inserted(candle))
        }
    }
}

/// Bring an upstream snapshot into series shape: ordered, one candle per
/// bucket, every candle valid and aligned to `interval`.
///
/// Duplicate buckets keep the later entry.  Anything else that breaks the
/// candle invariants is dropped with a warning.
pub fn normalize_snapshot(mut candles: Vec<Candle>, interval: Interval) -> Vec<Candle> {
    let width = interval.seconds();
    let before = candles.len();

    candles.retain(|c| {
        let ok = c.is_well_formed() && c.bucket_start.rem_euclid(width) == 0;
        if !ok {
            warn!(
                bucket_start = c.bucket_start,
                interval = %interval,
                "dropping malformed snapshot candle"
            );
        }
        ok
    });

    // Stable sort keeps upstream order within a bucket, so the last one wins.
    candles.sort_by_key(|c| c.bucket_start);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(prev) if prev.bucket_start == candle.bucket_start => *prev = candle,
            _ => out.push(candle),
        }
    }

    if out.len() != before {
        warn!(
            received = before,
            kept = out.len(),
            interval = %interval,
            "snapshot normalised"
        );
    }
    out
}
