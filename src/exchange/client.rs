// =============================================================================
// Exchange REST Client - candle history snapshots
// =============================================================================
//
// The exchange aggregates its own trade tape into OHLCV buckets and serves the
// most recent `limit` of them at
//
//   GET {api_url}/trades/{symbol}?interval=1m&limit=100
//
// Timestamps come back in milliseconds; candles here are keyed in seconds.
// =============================================================================

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::ChartError;
use crate::market_data::Candle;
use crate::types::Interval;

/// Source of full candle history for one symbol and interval.
///
/// Futures are `'static` so a pull can stay in flight while the orchestrator
/// keeps processing live events.
pub trait HistorySource: Send + Sync {
    fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<Candle>, ChartError>>;
}

/// Wire shape of one bucket from the history endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OhlcvRow {
    /// Bucket start in epoch milliseconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl From<OhlcvRow> for Candle {
    fn from(row: OhlcvRow) -> Self {
        Candle::new(row.time.div_euclid(1000), row.open, row.high, row.low, row.close)
    }
}

/// HTTP history source talking to the exchange REST API.
#[derive(Clone)]
pub struct HttpHistorySource {
    base_url: String,
    client: reqwest::Client,
}

impl HttpHistorySource {
    /// Create a client for `api_url` (e.g. `http://localhost:8010`).
    pub fn new(api_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = api_url.trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "HttpHistorySource initialised");

        Ok(Self { base_url, client })
    }

    pub fn candles_url(&self, symbol: &str, interval: Interval, limit: usize) -> String {
        format!(
            "{}/trades/{}?interval={}&limit={}",
            self.base_url,
            symbol,
            interval.label(),
            limit
        )
    }

    /// GET /trades/{symbol}.
    #[instrument(skip(self), name = "exchange::get_candles")]
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = self.candles_url(symbol, interval, limit);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("GET {url} returned {status}: {body}");
        }

        let rows = decode_rows(&resp.bytes().await.context("failed to read candle response")?)?;
        debug!(count = rows.len(), "candle history retrieved");
        Ok(rows)
    }
}

impl HistorySource for HttpHistorySource {
    fn fetch_candles(
        &self,
        symbol: &str,
        interval: Interval,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<Candle>, ChartError>> {
        let this = self.clone();
        let symbol = symbol.to_string();
        async move {
            this.get_candles(&symbol, interval, limit)
                .await
                .map_err(|e| ChartError::unavailable(&e))
        }
        .boxed()
    }
}

/// Decode the endpoint body.  The exchange answers `null` when it has no
/// trades yet; that is an empty history, not an error.
pub fn decode_rows(body: &[u8]) -> Result<Vec<Candle>> {
    let rows: Option<Vec<OhlcvRow>> =
        serde_json::from_slice(body).context("failed to parse candle history JSON")?;
    Ok(rows
        .unwrap_or_default()
        .into_iter()
        .map(Candle::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_uses_interval_label() {
        let client = HttpHistorySource::new("http://localhost:8010/").unwrap();
        assert_eq!(
            client.candles_url("BTC_USDT", Interval::FifteenMinutes, 100),
            "http://localhost:8010/trades/BTC_USDT?interval=15m&limit=100"
        );
    }

    #[test]
    fn decode_converts_millis_to_seconds() {
        let body = br#"[
            { "time": 1700000040000, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 3.0 },
            { "time": 1700000100000, "open": 1.5, "high": 1.6, "low": 1.4, "close": 1.45 }
        ]"#;
        let candles = decode_rows(body).unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0], Candle::new(1_700_000_040, 1.0, 2.0, 0.5, 1.5));
        assert_eq!(candles[1].bucket_start, 1_700_000_100);
    }

    #[test]
    fn decode_null_is_empty_history() {
        assert!(decode_rows(b"null").unwrap().is_empty());
        assert!(decode_rows(b"[]").unwrap().is_empty());
    }

    #[test]
    fn decode_rejects_error_body() {
        assert!(decode_rows(br#"{ "error": "db down" }"#).is_err());
    }

    #[tokio::test]
    async fn unreachable_host_maps_to_unavailable() {
        let client = HttpHistorySource::new("http://127.0.0.1:9").unwrap();
        let err = client
            .fetch_candles("BTC_USDT", Interval::OneMinute, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ChartError::Unavailable(_)));
    }
}
