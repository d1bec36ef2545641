pub mod bucketing;
pub mod candle_series;
pub mod trade_stream;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle_series::{Candle, CandleSeriesStore};
pub use trade_stream::{LiveEventSource, LiveNotification, TradeEvent, WsLiveEventSource};
