// =============================================================================
// Live Trade Stream - push channel for incremental chart updates
// =============================================================================
//
// The exchange broadcasts every event type over one WebSocket (`/ws`).  This
// module turns that socket into a lazy, non-restartable stream of
// notifications: `Open` once connected, one `Message` per JSON text frame,
// then either `Error` or `Closed` as the last item.  Dropping the stream
// closes the socket.
// =============================================================================

use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::ChartError;

/// Message tag carrying a single executed trade.
pub const TRADE_UPDATE: &str = "TRADE_UPDATE";

/// A single executed trade, as consumed by the bucketing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeEvent {
    pub price: f64,
    pub occurred_at_millis: i64,
    pub symbol: String,
}

/// One tagged message from the exchange socket.
///
/// Expected shape for trades:
/// ```json
/// { "type": "TRADE_UPDATE", "symbol": "BTC_USDT", "price": 50000.0, "amount": 0.1, "time": 1700000000000 }
/// ```
/// Other types (e.g. `ORDERBOOK_UPDATE`) parse too and are ignored downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub time: Option<i64>,
}

impl LiveMessage {
    pub fn is_trade_update(&self) -> bool {
        self.kind == TRADE_UPDATE
    }

    /// Interpret a trade update as a [`TradeEvent`].
    ///
    /// Returns `None` for every other message type.
    pub fn to_trade_event(&self) -> Option<Result<TradeEvent, ChartError>> {
        if !self.is_trade_update() {
            return None;
        }
        let event = match (&self.symbol, self.price, self.time) {
            (Some(symbol), Some(price), Some(time)) => Ok(TradeEvent {
                price,
                occurred_at_millis: time,
                symbol: symbol.clone(),
            }),
            _ => Err(ChartError::InvalidTrade(format!(
                "trade update missing symbol/price/time: {self:?}"
            ))),
        };
        Some(event)
    }
}

/// Lifecycle notifications of one live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveNotification {
    Open,
    Message(LiveMessage),
    Error(String),
    Closed,
}

/// Source of live exchange events.
///
/// Each call opens a fresh connection; the returned stream is consumed once.
pub trait LiveEventSource: Send + Sync {
    fn subscribe(&self) -> BoxStream<'static, LiveNotification>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

enum SocketState {
    Connect(String),
    Reading(Box<Socket>),
    Done,
}

/// Live source backed by the exchange WebSocket at `{ws_url}/ws`.
#[derive(Debug, Clone)]
pub struct WsLiveEventSource {
    url: String,
}

impl WsLiveEventSource {
    pub fn new(ws_url: &str) -> Self {
        Self {
            url: format!("{}/ws", ws_url.trim_end_matches('/')),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl LiveEventSource for WsLiveEventSource {
    fn subscribe(&self) -> BoxStream<'static, LiveNotification> {
        stream::unfold(SocketState::Connect(self.url.clone()), next_notification).boxed()
    }
}

async fn next_notification(state: SocketState) -> Option<(LiveNotification, SocketState)> {
    match state {
        SocketState::Connect(url) => {
            info!(url = %url, "connecting to live trade WebSocket");
            match connect_async(url.as_str()).await {
                Ok((ws, _response)) => {
                    info!(url = %url, "live trade WebSocket connected");
                    Some((LiveNotification::Open, SocketState::Reading(Box::new(ws))))
                }
                Err(e) => {
                    error!(url = %url, error = %e, "failed to connect to live trade WebSocket");
                    Some((LiveNotification::Error(e.to_string()), SocketState::Done))
                }
            }
        }
        SocketState::Reading(mut ws) => loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match parse_live_message(&text) {
                    Ok(msg) => {
                        return Some((LiveNotification::Message(msg), SocketState::Reading(ws)));
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to parse live message");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    info!(frame = ?frame, "live trade WebSocket closed by server");
                    return Some((LiveNotification::Closed, SocketState::Done));
                }
                // Ping / Pong / Binary -- tungstenite answers pings itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "live trade WebSocket read error");
                    return Some((LiveNotification::Error(e.to_string()), SocketState::Done));
                }
                None => {
                    warn!("live trade WebSocket stream ended");
                    return Some((LiveNotification::Closed, SocketState::Done));
                }
            }
        },
        SocketState::Done => {
            debug!("live subscription exhausted");
            None
        }
    }
}

/// Parse one text frame from the exchange socket.
pub fn parse_live_message(text: &str) -> anyhow::Result<LiveMessage> {
    use anyhow::Context;
    serde_json::from_str(text).context("failed to parse live message JSON")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_trade_update() {
        let json = r#"{
            "type": "TRADE_UPDATE",
            "symbol": "BTC_USDT",
            "price": 50000.5,
            "amount": 0.25,
            "time": 1700000000000
        }"#;
        let msg = parse_live_message(json).expect("should parse");
        assert!(msg.is_trade_update());
        let event = msg.to_trade_event().unwrap().unwrap();
        assert_eq!(
            event,
            TradeEvent {
                price: 50000.5,
                occurred_at_millis: 1_700_000_000_000,
                symbol: "BTC_USDT".into(),
            }
        );
    }

    #[test]
    fn orderbook_update_is_not_a_trade() {
        let json = r#"{ "type": "ORDERBOOK_UPDATE", "symbol": "BTC_USDT", "asks": [], "bids": [] }"#;
        let msg = parse_live_message(json).expect("should parse");
        assert!(msg.to_trade_event().is_none());
    }

    #[test]
    fn trade_update_without_price_is_invalid() {
        let json = r#"{ "type": "TRADE_UPDATE", "symbol": "BTC_USDT", "time": 1 }"#;
        let msg = parse_live_message(json).unwrap();
        let err = msg.to_trade_event().unwrap().unwrap_err();
        assert!(matches!(err, ChartError::InvalidTrade(_)));
    }

    #[test]
    fn garbage_frame_fails_to_parse() {
        assert!(parse_live_message("not json").is_err());
        assert!(parse_live_message(r#"{ "symbol": "BTC_USDT" }"#).is_err());
    }

    #[test]
    fn ws_url_gets_path_appended() {
        let src = WsLiveEventSource::new("ws://localhost:8010/");
        assert_eq!(src.url(), "ws://localhost:8010/ws");
    }

    #[tokio::test]
    async fn unreachable_socket_yields_single_error() {
        // Port 9 (discard) is closed on test hosts; connect fails fast.
        let src = WsLiveEventSource::new("ws://127.0.0.1:9");
        let items: Vec<LiveNotification> = src.subscribe().collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], LiveNotification::Error(_)));
    }
}
